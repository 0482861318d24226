use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::error::ScheduleError;
use crate::services::recurrence::{RecurrenceRule, Termination};
use crate::models::{
    ApplyScheduleRequest, DeleteOccurrenceRequest, EditScope, NewSchedule, ScheduleFields,
    ScheduleRecord,
};

const SCHEDULES_PATH: &str = "/rest/v1/doctor_schedules";
const EXCEPTIONS_PATH: &str = "/rest/v1/schedule_exceptions";
const APPLY_PLAN_RPC: &str = "/rest/v1/rpc/apply_schedule_plan";

/// Persistence boundary for schedules. Implementations serialize writes to
/// the same schedule and report a moved-on version as `Conflict`.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_schedule(&self, schedule_id: Uuid) -> Result<ScheduleRecord, ScheduleError>;

    async fn create_schedule(&self, schedule: &NewSchedule) -> Result<ScheduleRecord, ScheduleError>;

    async fn apply_edit(&self, request: &ApplyScheduleRequest) -> Result<(), ScheduleError>;

    async fn delete_occurrence(&self, request: &DeleteOccurrenceRequest) -> Result<(), ScheduleError>;
}

#[async_trait]
impl<T: ScheduleStore + ?Sized> ScheduleStore for Arc<T> {
    async fn get_schedule(&self, schedule_id: Uuid) -> Result<ScheduleRecord, ScheduleError> {
        (**self).get_schedule(schedule_id).await
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> Result<ScheduleRecord, ScheduleError> {
        (**self).create_schedule(schedule).await
    }

    async fn apply_edit(&self, request: &ApplyScheduleRequest) -> Result<(), ScheduleError> {
        (**self).apply_edit(request).await
    }

    async fn delete_occurrence(&self, request: &DeleteOccurrenceRequest) -> Result<(), ScheduleError> {
        (**self).delete_occurrence(request).await
    }
}

// ==============================================================================
// WRITE PLANS
// ==============================================================================

/// One write against the schedule tables. A plan is applied as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanStep {
    /// Rewrite the edited schedule row in place.
    UpdateSchedule {
        doctor_id: Uuid,
        location_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        recurrence_rule: Option<String>,
    },
    /// End the edited series before the split point. Its exceptions from
    /// `drop_exceptions_from` on are removed.
    TruncateSchedule {
        recurrence_rule: String,
        drop_exceptions_from: DateTime<Utc>,
    },
    InsertSchedule {
        doctor_id: Uuid,
        location_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        recurrence_rule: Option<String>,
        /// Cancelled occurrences carried over to the new row.
        #[serde(default)]
        exceptions: Vec<DateTime<Utc>>,
    },
    /// Cancel one occurrence of the edited series.
    InsertException { occurrence_start: DateTime<Utc> },
    /// Move every exception of the edited row by the same offset, following
    /// a change to the row's time of day.
    ShiftExceptions { offset_seconds: i64 },
    DeleteSchedule,
}

fn update_step(fields: &ScheduleFields, (start, end): (DateTime<Utc>, DateTime<Utc>), rule: Option<String>) -> PlanStep {
    PlanStep::UpdateSchedule {
        doctor_id: fields.doctor_id,
        location_id: fields.location_id,
        start_time: start,
        end_time: end,
        recurrence_rule: rule,
    }
}

fn insert_step(
    fields: &ScheduleFields,
    (start, end): (DateTime<Utc>, DateTime<Utc>),
    rule: Option<String>,
    exceptions: Vec<DateTime<Utc>>,
) -> PlanStep {
    PlanStep::InsertSchedule {
        doctor_id: fields.doctor_id,
        location_id: fields.location_id,
        start_time: start,
        end_time: end,
        recurrence_rule: rule,
        exceptions,
    }
}

/// The rule kept on `current` when it is cut at `split`, or `None` when
/// the cut leaves nothing before it.
fn prefix_rule(current: &ScheduleRecord, split: DateTime<Utc>) -> Result<Option<String>, ScheduleError> {
    if split <= current.start_time {
        return Ok(None);
    }
    Ok(current.rule()?.map(|rule| rule.truncated_before(split).encode()))
}

/// How far each occurrence moves when the row takes the edited time of day.
fn time_of_day_offset(current: &ScheduleRecord, fields: &ScheduleFields) -> Duration {
    fields.start_time_of_day.signed_duration_since(current.start_time.time())
}

fn shift_step(current: &ScheduleRecord, offset: Duration) -> Option<PlanStep> {
    (!current.exceptions.is_empty() && offset != Duration::zero()).then(|| PlanStep::ShiftExceptions {
        offset_seconds: offset.num_seconds(),
    })
}

/// First block of a series following `rule` from `split` on: the first
/// date the rule fires on, at the edited time of day. `None` when the rule
/// ends before it fires.
fn series_start(
    fields: &ScheduleFields,
    rule: Option<&RecurrenceRule>,
    split: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let Some(rule) = rule else {
        return Some(fields.on_date(split.date_naive()));
    };
    let (start, end) = fields.on_date(rule.first_firing_date(split.date_naive()));
    match rule.termination {
        Termination::Until(until) if start > until => None,
        _ => Some((start, end)),
    }
}

/// Writes that carry out an edit against the current row.
///
/// A split for `ThisAndFollowing` starts a new series at the first date
/// the new rule fires on from the edited occurrence; a `COUNT` on the new
/// rule counts from there. Exceptions follow the occurrences they cancel.
pub fn plan_edit(current: &ScheduleRecord, request: &ApplyScheduleRequest) -> Result<Vec<PlanStep>, ScheduleError> {
    let fields = request.fields();
    let offset = time_of_day_offset(current, &fields);

    let mut steps = Vec::new();
    match request.edit_scope {
        EditScope::EntireSeries => {
            let block = fields.on_date(current.start_time.date_naive());
            steps.push(update_step(&fields, block, request.recurrence_text.clone()));
            steps.extend(shift_step(current, offset));
        }
        EditScope::ThisAndFollowing => {
            let split = request.occurrence_start;
            let new_rule = request
                .recurrence_text
                .as_deref()
                .map(|text| RecurrenceRule::decode(text, split))
                .transpose()?;
            let block = series_start(&fields, new_rule.as_ref(), split);
            let rule_text = new_rule.as_ref().map(RecurrenceRule::encode);

            match (prefix_rule(current, split)?, block) {
                (Some(prefix), block) => {
                    steps.push(PlanStep::TruncateSchedule {
                        recurrence_rule: prefix,
                        drop_exceptions_from: split,
                    });
                    if let Some(block) = block {
                        let carried = current
                            .exceptions
                            .iter()
                            .filter(|start| **start >= split)
                            .map(|start| *start + offset)
                            .collect();
                        steps.push(insert_step(&fields, block, rule_text, carried));
                    }
                }
                (None, Some(block)) => {
                    steps.push(update_step(&fields, block, rule_text));
                    steps.extend(shift_step(current, offset));
                }
                (None, None) => steps.push(PlanStep::DeleteSchedule),
            }
        }
        EditScope::ThisOccurrenceOnly => {
            let block = fields.on_date(request.occurrence_start.date_naive());
            steps.push(PlanStep::InsertException { occurrence_start: request.occurrence_start });
            steps.push(insert_step(&fields, block, None, Vec::new()));
        }
    }

    Ok(steps)
}

/// Writes that carry out a delete against the current row.
pub fn plan_delete(current: &ScheduleRecord, request: &DeleteOccurrenceRequest) -> Result<Vec<PlanStep>, ScheduleError> {
    if current.recurrence_rule.is_none() {
        return Ok(vec![PlanStep::DeleteSchedule]);
    }

    let steps = match request.edit_scope {
        EditScope::EntireSeries => vec![PlanStep::DeleteSchedule],
        EditScope::ThisAndFollowing => match prefix_rule(current, request.occurrence_start)? {
            Some(prefix) => vec![PlanStep::TruncateSchedule {
                recurrence_rule: prefix,
                drop_exceptions_from: request.occurrence_start,
            }],
            None => vec![PlanStep::DeleteSchedule],
        },
        EditScope::ThisOccurrenceOnly => vec![PlanStep::InsertException {
            occurrence_start: request.occurrence_start,
        }],
    };

    Ok(steps)
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

#[derive(Debug, Deserialize)]
struct ExceptionRow {
    occurrence_start: DateTime<Utc>,
}

/// Schedule store backed by PostgREST. Plans are submitted to the
/// `apply_schedule_plan` function, which runs them in one transaction and
/// answers 409 when the expected version no longer matches. Besides the row
/// writes, the function owns the `schedule_exceptions` side of each step:
/// `insert_schedule` inserts the carried exceptions for the new row,
/// `truncate_schedule` deletes the edited row's exceptions from
/// `drop_exceptions_from` on, and `shift_exceptions` adds `offset_seconds`
/// to every exception of the edited row.
pub struct SupabaseScheduleStore {
    supabase: SupabaseClient,
    auth_token: String,
}

impl SupabaseScheduleStore {
    pub fn new(config: &AppConfig, auth_token: &str) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            auth_token: auth_token.to_string(),
        }
    }

    async fn submit_plan(
        &self,
        schedule_id: Uuid,
        expected_version: i64,
        steps: Vec<PlanStep>,
    ) -> Result<(), ScheduleError> {
        debug!(
            "Submitting {} step plan for schedule {} at version {}",
            steps.len(),
            schedule_id,
            expected_version
        );

        let body = json!({
            "p_schedule_id": schedule_id,
            "p_expected_version": expected_version,
            "p_steps": steps,
        });

        self.supabase
            .execute(Method::POST, APPLY_PLAN_RPC, Some(&self.auth_token), Some(body))
            .await
            .map_err(|e| {
                error!("Failed to apply plan for schedule {}: {}", schedule_id, e);
                ScheduleError::from_store(e)
            })
    }

    fn check_version(current: &ScheduleRecord, expected: Option<i64>) -> Result<i64, ScheduleError> {
        match expected {
            Some(version) if version != current.version => Err(ScheduleError::Conflict(format!(
                "schedule {} is at version {}, edit was made against {}",
                current.id, current.version, version
            ))),
            _ => Ok(current.version),
        }
    }
}

#[async_trait]
impl ScheduleStore for SupabaseScheduleStore {
    async fn get_schedule(&self, schedule_id: Uuid) -> Result<ScheduleRecord, ScheduleError> {
        debug!("Fetching schedule: {}", schedule_id);

        let path = format!("{}?id=eq.{}", SCHEDULES_PATH, schedule_id);
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, Some(&self.auth_token), None)
            .await
            .map_err(ScheduleError::from_store)?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::NotFound(schedule_id.to_string()))?;
        let mut record: ScheduleRecord = serde_json::from_value(row)
            .map_err(|e| ScheduleError::Store(format!("Malformed schedule row: {}", e)))?;

        let path = format!(
            "{}?schedule_id=eq.{}&select=occurrence_start&order=occurrence_start.asc",
            EXCEPTIONS_PATH, schedule_id
        );
        let exceptions: Vec<ExceptionRow> = self.supabase
            .request(Method::GET, &path, Some(&self.auth_token), None)
            .await
            .map_err(ScheduleError::from_store)?;
        record.exceptions = exceptions.into_iter().map(|row| row.occurrence_start).collect();

        Ok(record)
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> Result<ScheduleRecord, ScheduleError> {
        debug!("Creating schedule for doctor {}", schedule.doctor_id);

        let body = json!({
            "doctor_id": schedule.doctor_id,
            "location_id": schedule.location_id,
            "start_time": schedule.start_time.to_rfc3339(),
            "end_time": schedule.end_time.to_rfc3339(),
            "recurrence_rule": schedule.recurrence_rule,
            "version": 1,
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase
            .request_with_headers(Method::POST, SCHEDULES_PATH, Some(&self.auth_token), Some(body), Some(headers))
            .await
            .map_err(ScheduleError::from_store)?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::Store("Failed to create schedule".to_string()))?;
        let record: ScheduleRecord = serde_json::from_value(row)
            .map_err(|e| ScheduleError::Store(format!("Malformed schedule row: {}", e)))?;

        debug!("Schedule created successfully with ID: {}", record.id);
        Ok(record)
    }

    async fn apply_edit(&self, request: &ApplyScheduleRequest) -> Result<(), ScheduleError> {
        let current = self.get_schedule(request.schedule_id).await?;
        let version = Self::check_version(&current, request.expected_version)?;
        let steps = plan_edit(&current, request)?;
        self.submit_plan(request.schedule_id, version, steps).await
    }

    async fn delete_occurrence(&self, request: &DeleteOccurrenceRequest) -> Result<(), ScheduleError> {
        let current = self.get_schedule(request.schedule_id).await?;
        let version = Self::check_version(&current, request.expected_version)?;
        let steps = plan_delete(&current, request)?;
        self.submit_plan(request.schedule_id, version, steps).await
    }
}
