use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ScheduleError;
use crate::models::{
    ApplyScheduleRequest, DeleteOccurrenceRequest, EditScope, ScheduleFields,
};
use crate::services::classifier::{classify, delete_scopes, EditCase};
use crate::services::recurrence::RecurrenceRule;
use crate::services::store::ScheduleStore;

/// What the user is being asked to confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPrompt {
    Edit {
        case: EditCase,
        offered: &'static [EditScope],
    },
    Delete {
        offered: &'static [EditScope],
    },
}

impl ConfirmationPrompt {
    pub fn offered_scopes(&self) -> &'static [EditScope] {
        match self {
            ConfirmationPrompt::Edit { offered, .. } | ConfirmationPrompt::Delete { offered } => offered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDecision {
    Confirmed(EditScope),
    Cancelled,
}

/// Obtains the user's decision for a pending change, e.g. through a dialog.
#[async_trait]
pub trait ScopeConfirmer: Send + Sync {
    async fn confirm(&self, prompt: &ConfirmationPrompt) -> ScopeDecision;
}

/// Confirmer for request/response callers that send their decision up
/// front. Without a decision only a single offered scope is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresetScope(pub Option<EditScope>);

#[async_trait]
impl ScopeConfirmer for PresetScope {
    async fn confirm(&self, prompt: &ConfirmationPrompt) -> ScopeDecision {
        match (self.0, prompt.offered_scopes()) {
            (Some(scope), _) => ScopeDecision::Confirmed(scope),
            (None, [only]) => ScopeDecision::Confirmed(*only),
            (None, _) => ScopeDecision::Cancelled,
        }
    }
}

/// An edit made against one displayed occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceEdit {
    pub schedule_id: Uuid,
    pub occurrence_start: DateTime<Utc>,
    pub old_rule: Option<RecurrenceRule>,
    pub new_rule: Option<RecurrenceRule>,
    pub fields: ScheduleFields,
    pub expected_version: Option<i64>,
}

/// Outcome of a successful edit. Occurrences previously expanded for
/// `schedule_id` are stale and must be expanded again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEdit {
    pub schedule_id: Uuid,
    pub case: EditCase,
    pub scope: EditScope,
    pub recurrence_text: Option<String>,
}

pub struct ScheduleEditApplier<S> {
    store: S,
}

impl<S: ScheduleStore> ScheduleEditApplier<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Classify, confirm with the user, then apply. Cancelling aborts with
    /// no store call.
    pub async fn apply(
        &self,
        edit: &OccurrenceEdit,
        confirmer: &dyn ScopeConfirmer,
    ) -> Result<AppliedEdit, ScheduleError> {
        let case = classify(edit.old_rule.as_ref(), edit.new_rule.as_ref());
        validate_edit(edit)?;

        let prompt = ConfirmationPrompt::Edit {
            case,
            offered: case.offered_scopes(),
        };
        match confirmer.confirm(&prompt).await {
            ScopeDecision::Confirmed(scope) => self.apply_with_scope(edit, scope).await,
            ScopeDecision::Cancelled => {
                info!("Edit of schedule {} cancelled at {} prompt", edit.schedule_id, case);
                Err(ScheduleError::Cancelled)
            }
        }
    }

    /// Apply an edit with an already chosen scope. The case is always
    /// recomputed here; a scope outside its table is rejected before any
    /// store call.
    pub async fn apply_with_scope(
        &self,
        edit: &OccurrenceEdit,
        scope: EditScope,
    ) -> Result<AppliedEdit, ScheduleError> {
        let case = classify(edit.old_rule.as_ref(), edit.new_rule.as_ref());
        if !case.permits(scope) {
            warn!(
                "Rejected scope {} for {} edit of schedule {}",
                scope, case, edit.schedule_id
            );
            return Err(ScheduleError::ScopeNotPermitted { case, scope });
        }
        validate_edit(edit)?;

        let recurrence_text = edit.new_rule.as_ref().map(RecurrenceRule::encode);
        let request = ApplyScheduleRequest {
            schedule_id: edit.schedule_id,
            occurrence_start: edit.occurrence_start,
            edit_scope: scope,
            doctor_id: edit.fields.doctor_id,
            location_id: edit.fields.location_id,
            start_time_of_day: edit.fields.start_time_of_day,
            end_time_of_day: edit.fields.end_time_of_day,
            recurrence_text: recurrence_text.clone(),
            expected_version: edit.expected_version,
        };

        self.store.apply_edit(&request).await?;

        info!(
            "Applied {} edit to schedule {} with scope {}",
            case, edit.schedule_id, scope
        );
        Ok(AppliedEdit {
            schedule_id: edit.schedule_id,
            case,
            scope,
            recurrence_text,
        })
    }

    /// Delete the occurrence at `occurrence_start` after confirming a scope.
    pub async fn delete_occurrence(
        &self,
        schedule_id: Uuid,
        occurrence_start: DateTime<Utc>,
        rule: Option<&RecurrenceRule>,
        expected_version: Option<i64>,
        confirmer: &dyn ScopeConfirmer,
    ) -> Result<EditScope, ScheduleError> {
        let prompt = ConfirmationPrompt::Delete {
            offered: delete_scopes(rule),
        };
        let scope = match confirmer.confirm(&prompt).await {
            ScopeDecision::Confirmed(scope) => scope,
            ScopeDecision::Cancelled => {
                info!("Delete on schedule {} cancelled", schedule_id);
                return Err(ScheduleError::Cancelled);
            }
        };

        if !prompt.offered_scopes().contains(&scope) {
            warn!("Rejected delete scope {} for schedule {}", scope, schedule_id);
            return Err(ScheduleError::validation(format!(
                "Scope '{}' is not available for this delete",
                scope
            )));
        }

        let request = DeleteOccurrenceRequest {
            schedule_id,
            occurrence_start,
            edit_scope: scope,
            expected_version,
        };
        self.store.delete_occurrence(&request).await?;

        info!("Deleted occurrence {} of schedule {} with scope {}", occurrence_start, schedule_id, scope);
        Ok(scope)
    }
}

fn validate_edit(edit: &OccurrenceEdit) -> Result<(), ScheduleError> {
    edit.fields.validate()?;
    if let Some(rule) = &edit.new_rule {
        rule.validate(edit.occurrence_start)?;
    }
    debug!("Edit of schedule {} passed validation", edit.schedule_id);
    Ok(())
}
