pub mod recurrence;
pub mod expander;
pub mod classifier;
pub mod applier;
pub mod store;

pub use recurrence::{RecurrenceRule, Frequency, Termination, WeekdaySet, rule_equals};
pub use expander::{expand, expand_schedule, expand_with_options, occurs_at, ExpansionOptions, OccurrenceWindow};
pub use classifier::{classify, delete_scopes, Classification, EditCase};
pub use applier::{
    AppliedEdit, ConfirmationPrompt, OccurrenceEdit, PresetScope, ScheduleEditApplier,
    ScopeConfirmer, ScopeDecision,
};
pub use store::{plan_delete, plan_edit, PlanStep, ScheduleStore, SupabaseScheduleStore};
