//! Recurrence rules for doctor schedules and their textual wire form,
//! e.g. `FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE,FR;COUNT=10`.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Utc, Weekday,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DecodeError, ScheduleError};

const UNTIL_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const UNTIL_DATE_FORMAT: &str = "%Y%m%d";

/// Canonical weekday order used for iteration and encoding.
pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub const fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }

    /// Case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "DAILY" => Frequency::Daily,
            "WEEKLY" => Frequency::Weekly,
            "MONTHLY" => Frequency::Monthly,
            _ => return None,
        })
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

pub fn parse_weekday_code(code: &str) -> Option<Weekday> {
    WEEK.into_iter()
        .find(|day| weekday_code(*day).eq_ignore_ascii_case(code))
}

/// Set of weekdays stored as one bit per day. Equality is set equality and
/// iteration always runs Monday through Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const fn empty() -> Self {
        WeekdaySet(0)
    }

    pub fn single(day: Weekday) -> Self {
        let mut set = Self::empty();
        set.insert(day);
        set
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= Self::bit(day);
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        WEEK.into_iter().filter(move |day| self.contains(*day))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::empty();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

/// When a rule stops producing occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Never,
    /// Last permitted occurrence start, inclusive.
    Until(DateTime<Utc>),
    /// Total number of occurrences, counted from the base occurrence.
    Count(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    /// Only meaningful for weekly rules; empty means the base weekday.
    pub by_weekday: WeekdaySet,
    pub termination: Termination,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            by_weekday: WeekdaySet::empty(),
            termination: Termination::Never,
        }
    }

    pub fn daily(interval: u32) -> Self {
        Self::new(Frequency::Daily, interval)
    }

    pub fn weekly(interval: u32, days: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            by_weekday: days.into_iter().collect(),
            ..Self::new(Frequency::Weekly, interval)
        }
    }

    pub fn monthly(interval: u32) -> Self {
        Self::new(Frequency::Monthly, interval)
    }

    /// `UNTIL` is kept at second precision, the precision it is written with.
    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = match termination {
            Termination::Until(until) => Termination::Until(until.trunc_subsecs(0)),
            other => other,
        };
        self
    }

    /// Canonical text form. Identical rules always encode identically.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse the wire form. `anchor` is the start of the series the rule
    /// belongs to; a weekly rule without `BYDAY` takes the anchor's weekday.
    pub fn decode(text: &str, anchor: DateTime<Utc>) -> Result<Self, DecodeError> {
        let text = text.trim();
        let text = text.strip_prefix("RRULE:").unwrap_or(text);

        let mut frequency = None;
        let mut interval = None;
        let mut by_day: Option<WeekdaySet> = None;
        let mut until = None;
        let mut count = None;

        for token in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| DecodeError::MalformedToken(token.to_string()))?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();

            match key.as_str() {
                "FREQ" => {
                    let freq = Frequency::parse(value)
                        .ok_or_else(|| DecodeError::UnknownFrequency(value.to_string()))?;
                    set_once(&mut frequency, freq, &key)?;
                }
                "INTERVAL" => {
                    let n = parse_positive(value)
                        .ok_or_else(|| DecodeError::InvalidInterval(value.to_string()))?;
                    set_once(&mut interval, n, &key)?;
                }
                "BYDAY" => {
                    let days = value
                        .split(',')
                        .map(str::trim)
                        .filter(|code| !code.is_empty())
                        .map(|code| {
                            parse_weekday_code(code)
                                .ok_or_else(|| DecodeError::InvalidWeekday(code.to_string()))
                        })
                        .collect::<Result<WeekdaySet, _>>()?;
                    set_once(&mut by_day, days, &key)?;
                }
                "UNTIL" => {
                    let instant = parse_until(value)
                        .ok_or_else(|| DecodeError::InvalidUntil(value.to_string()))?;
                    set_once(&mut until, instant, &key)?;
                }
                "COUNT" => {
                    let n = parse_positive(value)
                        .ok_or_else(|| DecodeError::InvalidCount(value.to_string()))?;
                    set_once(&mut count, n, &key)?;
                }
                _ => return Err(DecodeError::UnsupportedField(key)),
            }
        }

        let frequency = frequency.ok_or(DecodeError::MissingFrequency)?;

        let termination = match (until, count) {
            (Some(_), Some(_)) => return Err(DecodeError::ConflictingTermination),
            (Some(instant), None) => Termination::Until(instant),
            (None, Some(n)) => Termination::Count(n),
            (None, None) => Termination::Never,
        };

        let mut by_weekday = by_day.unwrap_or_default();
        if frequency != Frequency::Weekly && !by_weekday.is_empty() {
            warn!("Ignoring BYDAY on {} recurrence rule '{}'", frequency, text);
            by_weekday = WeekdaySet::empty();
        }

        let rule = RecurrenceRule {
            frequency,
            interval: interval.unwrap_or(1),
            by_weekday,
            termination,
        };

        Ok(rule.resolve_weekdays(anchor))
    }

    /// Check the bounds a rule must satisfy for a series starting at `anchor`.
    pub fn validate(&self, anchor: DateTime<Utc>) -> Result<(), ScheduleError> {
        if self.interval < 1 {
            return Err(ScheduleError::validation("Interval must be at least 1"));
        }
        if self.frequency != Frequency::Weekly && !self.by_weekday.is_empty() {
            return Err(ScheduleError::validation(
                "Weekdays can only be chosen for weekly recurrence",
            ));
        }
        match self.termination {
            Termination::Count(0) => {
                Err(ScheduleError::validation("Occurrence count must be at least 1"))
            }
            Termination::Until(until) if until < anchor => Err(ScheduleError::validation(
                "Recurrence end date is before the schedule start",
            )),
            _ => Ok(()),
        }
    }

    /// Make the implicit weekday of a weekly rule explicit.
    pub fn resolve_weekdays(mut self, anchor: DateTime<Utc>) -> Self {
        if self.frequency == Frequency::Weekly && self.by_weekday.is_empty() {
            self.by_weekday = WeekdaySet::single(anchor.weekday());
        }
        self
    }

    /// Weekdays a weekly rule fires on for a series starting at `anchor`.
    pub fn effective_weekdays(&self, anchor: DateTime<Utc>) -> WeekdaySet {
        if self.by_weekday.is_empty() {
            WeekdaySet::single(anchor.weekday())
        } else {
            self.by_weekday
        }
    }

    /// The rule left on the original series when it is split at `split`:
    /// same shape, ending just before the split point.
    pub fn truncated_before(&self, split: DateTime<Utc>) -> Self {
        self.clone()
            .with_termination(Termination::Until(split - Duration::seconds(1)))
    }

    /// First date on or after `from` the rule fires on when a series
    /// following it starts there. Only weekly rules can skip days.
    pub fn first_firing_date(&self, from: NaiveDate) -> NaiveDate {
        if self.frequency != Frequency::Weekly || self.by_weekday.is_empty() {
            return from;
        }
        from.iter_days()
            .take(7)
            .find(|date| self.by_weekday.contains(date.weekday()))
            .unwrap_or(from)
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={};INTERVAL={}", self.frequency, self.interval)?;

        if !self.by_weekday.is_empty() {
            let days: Vec<&str> = self.by_weekday.iter().map(weekday_code).collect();
            write!(f, ";BYDAY={}", days.join(","))?;
        }

        match self.termination {
            Termination::Never => Ok(()),
            Termination::Until(until) => write!(f, ";UNTIL={}", until.format(UNTIL_FORMAT)),
            Termination::Count(n) => write!(f, ";COUNT={}", n),
        }
    }
}

/// Structural equality of two optional rules; an absent rule never equals
/// a present one.
pub fn rule_equals(a: Option<&RecurrenceRule>, b: Option<&RecurrenceRule>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, key: &str) -> Result<(), DecodeError> {
    if slot.is_some() {
        return Err(DecodeError::DuplicateField(key.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_positive(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|n| *n >= 1)
}

fn parse_until(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, UNTIL_FORMAT) {
        return Some(dt.and_utc());
    }
    // A bare date includes the whole day.
    let date = NaiveDate::parse_from_str(value, UNTIL_DATE_FORMAT).ok()?;
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;
    Some(date.and_time(end_of_day).and_utc())
}
