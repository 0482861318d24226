use thiserror::Error;

use shared_database::SupabaseError;
use shared_models::error::AppError;

use crate::models::EditScope;
use crate::services::classifier::EditCase;

/// Malformed recurrence text. A schedule whose rule fails to decode is
/// unrenderable; callers must not guess a replacement rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("recurrence rule has no FREQ")]
    MissingFrequency,

    #[error("unknown frequency '{0}'")]
    UnknownFrequency(String),

    #[error("interval must be a positive integer, got '{0}'")]
    InvalidInterval(String),

    #[error("count must be a positive integer, got '{0}'")]
    InvalidCount(String),

    #[error("invalid UNTIL value '{0}'")]
    InvalidUntil(String),

    #[error("invalid weekday '{0}'")]
    InvalidWeekday(String),

    #[error("UNTIL and COUNT are mutually exclusive")]
    ConflictingTermination,

    #[error("malformed token '{0}'")]
    MalformedToken(String),

    #[error("unsupported field '{0}'")]
    UnsupportedField(String),

    #[error("field '{0}' appears more than once")]
    DuplicateField(String),
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid recurrence rule: {0}")]
    Decode(#[from] DecodeError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Scope '{scope}' is not permitted for a {case} edit")]
    ScopeNotPermitted { case: EditCase, scope: EditScope },

    #[error("Schedule changed concurrently: {0}")]
    Conflict(String),

    #[error("Schedule change cancelled")]
    Cancelled,

    #[error("Schedule not found: {0}")]
    NotFound(String),

    #[error("Schedule store error: {0}")]
    Store(String),
}

impl ScheduleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ScheduleError::Validation(msg.into())
    }

    /// Map a transport failure from the Supabase client onto the schedule
    /// error space, keeping conflicts distinguishable from other failures.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast_ref::<SupabaseError>() {
            Some(SupabaseError::Conflict(body)) => ScheduleError::Conflict(body.clone()),
            Some(SupabaseError::NotFound(body)) => ScheduleError::NotFound(body.clone()),
            _ => ScheduleError::Store(err.to_string()),
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Decode(e) => {
                AppError::Unprocessable(format!("Schedule recurrence cannot be rendered: {}", e))
            }
            ScheduleError::Validation(msg) => AppError::ValidationError(msg),
            e @ ScheduleError::ScopeNotPermitted { .. } => AppError::ValidationError(e.to_string()),
            ScheduleError::Conflict(msg) => AppError::Conflict(msg),
            e @ ScheduleError::Cancelled => AppError::BadRequest(e.to_string()),
            ScheduleError::NotFound(msg) => AppError::NotFound(msg),
            ScheduleError::Store(msg) => AppError::ExternalService(msg),
        }
    }
}
