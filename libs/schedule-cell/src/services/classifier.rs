use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::EditScope;
use crate::services::recurrence::{rule_equals, RecurrenceRule};

const ALL_SCOPES: &[EditScope] = &[
    EditScope::ThisOccurrenceOnly,
    EditScope::ThisAndFollowing,
    EditScope::EntireSeries,
];
const SERIES_ONLY: &[EditScope] = &[EditScope::EntireSeries];
const FOLLOWING_ONLY: &[EditScope] = &[EditScope::ThisAndFollowing];

/// How an edit relates the rule in effect to the rule requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditCase {
    SingleToSingle,
    SingleToRecurring,
    RecurringInfoAndToSingle,
    RecurringInfoOnly,
    RecurringInfoAndRrule,
}

impl EditCase {
    /// The scopes the user may choose from. Changing the shape of a series
    /// only ever applies from the edited occurrence onwards.
    pub fn offered_scopes(self) -> &'static [EditScope] {
        match self {
            EditCase::SingleToSingle | EditCase::SingleToRecurring => SERIES_ONLY,
            EditCase::RecurringInfoOnly => ALL_SCOPES,
            EditCase::RecurringInfoAndRrule | EditCase::RecurringInfoAndToSingle => FOLLOWING_ONLY,
        }
    }

    /// Whether the user must be shown a scope prompt rather than a plain
    /// "confirm changes" step.
    pub fn needs_scope_prompt(self) -> bool {
        match self {
            EditCase::SingleToSingle | EditCase::SingleToRecurring => false,
            EditCase::RecurringInfoOnly
            | EditCase::RecurringInfoAndRrule
            | EditCase::RecurringInfoAndToSingle => true,
        }
    }

    pub fn permits(self, scope: EditScope) -> bool {
        self.offered_scopes().contains(&scope)
    }
}

impl fmt::Display for EditCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EditCase::SingleToSingle => "single_to_single",
            EditCase::SingleToRecurring => "single_to_recurring",
            EditCase::RecurringInfoAndToSingle => "recurring_info_and_to_single",
            EditCase::RecurringInfoOnly => "recurring_info_only",
            EditCase::RecurringInfoAndRrule => "recurring_info_and_rrule",
        };
        f.write_str(label)
    }
}

/// Classification result as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub case: EditCase,
    pub offered_scopes: Vec<EditScope>,
    pub needs_scope_prompt: bool,
}

impl From<EditCase> for Classification {
    fn from(case: EditCase) -> Self {
        Self {
            case,
            offered_scopes: case.offered_scopes().to_vec(),
            needs_scope_prompt: case.needs_scope_prompt(),
        }
    }
}

pub fn classify(old_rule: Option<&RecurrenceRule>, new_rule: Option<&RecurrenceRule>) -> EditCase {
    let case = match (old_rule, new_rule) {
        (None, None) => EditCase::SingleToSingle,
        (None, Some(_)) => EditCase::SingleToRecurring,
        (Some(_), None) => EditCase::RecurringInfoAndToSingle,
        (Some(_), Some(_)) if rule_equals(old_rule, new_rule) => EditCase::RecurringInfoOnly,
        (Some(_), Some(_)) => EditCase::RecurringInfoAndRrule,
    };
    debug!("Classified schedule edit as {}", case);
    case
}

/// Scopes offered when deleting an occurrence.
pub fn delete_scopes(rule: Option<&RecurrenceRule>) -> &'static [EditScope] {
    match rule {
        Some(_) => ALL_SCOPES,
        None => SERIES_ONLY,
    }
}
