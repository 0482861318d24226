use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SubsecRound, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DecodeError, ScheduleError};
use crate::services::recurrence::{Frequency, RecurrenceRule, Termination};

// ==============================================================================
// SCHEDULE AGGREGATE
// ==============================================================================

/// One concrete working block. Its time-of-day and duration are carried
/// forward to every occurrence generated from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBase {
    pub doctor_id: Uuid,
    pub location_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ScheduleBase {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}

/// A schedule row as held by the schedule store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub location_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Absent means the schedule does not repeat.
    pub recurrence_rule: Option<String>,
    /// Start instants of cancelled occurrences.
    #[serde(default)]
    pub exceptions: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub version: i64,
}

impl ScheduleRecord {
    pub fn base(&self) -> ScheduleBase {
        ScheduleBase {
            doctor_id: self.doctor_id,
            location_id: self.location_id,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    /// Decode the stored rule, anchored at the series start.
    pub fn rule(&self) -> Result<Option<RecurrenceRule>, DecodeError> {
        self.recurrence_rule
            .as_deref()
            .map(|text| RecurrenceRule::decode(text, self.start_time))
            .transpose()
    }
}

/// A single calendar instance of a schedule. Never stored; two occurrences
/// are the same iff schedule and start match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    pub schedule_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditScope {
    ThisOccurrenceOnly,
    ThisAndFollowing,
    EntireSeries,
}

impl fmt::Display for EditScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditScope::ThisOccurrenceOnly => write!(f, "this_occurrence_only"),
            EditScope::ThisAndFollowing => write!(f, "this_and_following"),
            EditScope::EntireSeries => write!(f, "entire_series"),
        }
    }
}

/// The non-recurrence fields of a schedule edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFields {
    pub doctor_id: Uuid,
    pub location_id: Uuid,
    pub start_time_of_day: NaiveTime,
    pub end_time_of_day: NaiveTime,
}

impl ScheduleFields {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.start_time_of_day >= self.end_time_of_day {
            return Err(ScheduleError::validation("Start time must be before end time"));
        }
        Ok(())
    }

    /// Start and end instants of this block on the given date.
    pub fn on_date(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            date.and_time(self.start_time_of_day).and_utc(),
            date.and_time(self.end_time_of_day).and_utc(),
        )
    }
}

// ==============================================================================
// STORE COMMANDS
// ==============================================================================

/// Update command sent to the schedule store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyScheduleRequest {
    pub schedule_id: Uuid,
    pub occurrence_start: DateTime<Utc>,
    pub edit_scope: EditScope,
    pub doctor_id: Uuid,
    pub location_id: Uuid,
    pub start_time_of_day: NaiveTime,
    pub end_time_of_day: NaiveTime,
    pub recurrence_text: Option<String>,
    /// Version the edit was classified against; the store rejects the
    /// command when the row has moved on.
    pub expected_version: Option<i64>,
}

impl ApplyScheduleRequest {
    pub fn fields(&self) -> ScheduleFields {
        ScheduleFields {
            doctor_id: self.doctor_id,
            location_id: self.location_id,
            start_time_of_day: self.start_time_of_day,
            end_time_of_day: self.end_time_of_day,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOccurrenceRequest {
    pub schedule_id: Uuid,
    pub occurrence_start: DateTime<Utc>,
    pub edit_scope: EditScope,
    pub expected_version: Option<i64>,
}

/// Insert command for a brand new schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub doctor_id: Uuid,
    pub location_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub recurrence_rule: Option<String>,
}

// ==============================================================================
// REQUEST DTOs
// ==============================================================================

fn default_interval() -> u32 {
    1
}

/// Recurrence section of the schedule form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceForm {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    pub until: Option<DateTime<Utc>>,
    pub count: Option<u32>,
}

impl RecurrenceForm {
    pub fn into_rule(self) -> Result<RecurrenceRule, ScheduleError> {
        let termination = match (self.until, self.count) {
            (Some(_), Some(_)) => {
                return Err(ScheduleError::validation(
                    "A recurrence can end on a date or after a number of occurrences, not both",
                ));
            }
            // UNTIL is persisted at second precision.
            (Some(until), None) => Termination::Until(until.trunc_subsecs(0)),
            (None, Some(count)) => Termination::Count(count),
            (None, None) => Termination::Never,
        };

        Ok(RecurrenceRule {
            frequency: self.frequency,
            interval: self.interval,
            by_weekday: self.weekdays.into_iter().collect(),
            termination,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub doctor_id: Uuid,
    pub location_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub recurrence: Option<RecurrenceForm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditOccurrenceRequest {
    pub occurrence_start: DateTime<Utc>,
    pub doctor_id: Uuid,
    pub location_id: Uuid,
    pub start_time_of_day: NaiveTime,
    pub end_time_of_day: NaiveTime,
    pub recurrence: Option<RecurrenceForm>,
    /// The user's answer to the scope prompt, when one was needed.
    pub scope: Option<EditScope>,
}

impl EditOccurrenceRequest {
    pub fn fields(&self) -> ScheduleFields {
        ScheduleFields {
            doctor_id: self.doctor_id,
            location_id: self.location_id,
            start_time_of_day: self.start_time_of_day,
            end_time_of_day: self.end_time_of_day,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOccurrenceBody {
    pub occurrence_start: DateTime<Utc>,
    pub scope: Option<EditScope>,
}
