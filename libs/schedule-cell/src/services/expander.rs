use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::DecodeError;
use crate::models::{Occurrence, ScheduleBase, ScheduleRecord};
use crate::services::recurrence::{Frequency, RecurrenceRule, Termination, WeekdaySet};

const DEFAULT_MAX_OCCURRENCES: usize = 1000;

/// Half-open query window `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl OccurrenceWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.to && end > self.from
    }
}

#[derive(Debug, Clone)]
pub struct ExpansionOptions {
    /// Expansion stops once this many occurrences are visible.
    pub max_occurrences: usize,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
        }
    }
}

/// Occurrences of a schedule intersecting `window`, ascending by start.
pub fn expand(
    schedule_id: Uuid,
    base: &ScheduleBase,
    rule: Option<&RecurrenceRule>,
    window: &OccurrenceWindow,
) -> Vec<Occurrence> {
    expand_with_options(schedule_id, base, rule, window, &ExpansionOptions::default())
}

pub fn expand_with_options(
    schedule_id: Uuid,
    base: &ScheduleBase,
    rule: Option<&RecurrenceRule>,
    window: &OccurrenceWindow,
    options: &ExpansionOptions,
) -> Vec<Occurrence> {
    expand_excluding(schedule_id, base, rule, window, options, &[])
}

/// Expand a stored schedule, dropping its cancelled occurrences.
pub fn expand_schedule(
    record: &ScheduleRecord,
    window: &OccurrenceWindow,
    options: &ExpansionOptions,
) -> Result<Vec<Occurrence>, DecodeError> {
    let rule = record.rule()?;
    Ok(expand_excluding(
        record.id,
        &record.base(),
        rule.as_ref(),
        window,
        options,
        &record.exceptions,
    ))
}

/// Whether `start` is a live (not cancelled) occurrence of the schedule.
pub fn occurs_at(record: &ScheduleRecord, start: DateTime<Utc>) -> Result<bool, DecodeError> {
    let window = OccurrenceWindow::new(start, start + Duration::seconds(1));
    let options = ExpansionOptions::default();
    Ok(expand_schedule(record, &window, &options)?
        .iter()
        .any(|occurrence| occurrence.start_time == start))
}

fn expand_excluding(
    schedule_id: Uuid,
    base: &ScheduleBase,
    rule: Option<&RecurrenceRule>,
    window: &OccurrenceWindow,
    options: &ExpansionOptions,
    excluded: &[DateTime<Utc>],
) -> Vec<Occurrence> {
    if window.is_empty() || options.max_occurrences == 0 {
        return Vec::new();
    }

    let duration = base.duration();
    let occurrence = |start: DateTime<Utc>, end: DateTime<Utc>| Occurrence {
        schedule_id,
        start_time: start,
        end_time: end,
    };

    let Some(rule) = rule else {
        return if window.intersects(base.start_time, base.end_time)
            && !excluded.contains(&base.start_time)
        {
            vec![occurrence(base.start_time, base.end_time)]
        } else {
            Vec::new()
        };
    };

    let pattern = Pattern::new(rule, base.start_time);
    let mut occurrences: Vec<Occurrence> = Vec::new();
    let mut generated: u32 = 0;

    'periods: for period in pattern.first_period(rule, window, duration).. {
        let Some(period_start) = pattern.period_start(period) else {
            break;
        };
        if period_start >= window.to {
            break;
        }
        if let Termination::Until(until) = rule.termination {
            if period_start > until {
                break;
            }
        }

        for start in pattern.candidates(period) {
            match rule.termination {
                Termination::Count(n) if generated >= n => break 'periods,
                Termination::Until(until) if start > until => break 'periods,
                _ => {}
            }
            if start >= window.to {
                break 'periods;
            }
            generated += 1;

            let Some(end) = start.checked_add_signed(duration) else {
                break 'periods;
            };
            let is_new = occurrences.last().map_or(true, |last| last.start_time < start);
            if is_new && window.intersects(start, end) && !excluded.contains(&start) {
                occurrences.push(occurrence(start, end));
                if occurrences.len() >= options.max_occurrences {
                    debug!("Expansion of schedule {} hit the occurrence cap", schedule_id);
                    break 'periods;
                }
            }
        }
    }

    debug!(
        "Expanded schedule {} ({}) into {} occurrences",
        schedule_id,
        rule,
        occurrences.len()
    );
    occurrences
}

/// Period layout of a rule: a period is one day step, one week block, or
/// one month step. Candidates are produced in ascending order and the base
/// occurrence is always the first candidate of period 0.
struct Pattern {
    frequency: Frequency,
    interval: u64,
    base_start: DateTime<Utc>,
    base_date: NaiveDate,
    time_of_day: NaiveTime,
    weekdays: WeekdaySet,
}

impl Pattern {
    fn new(rule: &RecurrenceRule, base_start: DateTime<Utc>) -> Self {
        Self {
            frequency: rule.frequency,
            interval: u64::from(rule.interval.max(1)),
            base_start,
            base_date: base_start.date_naive(),
            time_of_day: base_start.time(),
            weekdays: rule.effective_weekdays(base_start),
        }
    }

    fn at(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(self.time_of_day).and_utc()
    }

    /// Monday of the base occurrence's week.
    fn first_week_start(&self) -> Option<NaiveDate> {
        let offset = u64::from(self.base_date.weekday().num_days_from_monday());
        self.base_date.checked_sub_days(Days::new(offset))
    }

    fn month_of(&self, period: u64) -> Option<(i32, u32)> {
        let months = i64::try_from(period.checked_mul(self.interval)?).ok()?;
        let index = i64::from(self.base_date.year()) * 12 + i64::from(self.base_date.month0()) + months;
        let year = i32::try_from(index.div_euclid(12)).ok()?;
        let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
        Some((year, month))
    }

    /// Earliest instant any candidate of `period` can have.
    fn period_start(&self, period: u64) -> Option<DateTime<Utc>> {
        let date = match self.frequency {
            Frequency::Daily => self
                .base_date
                .checked_add_days(Days::new(period.checked_mul(self.interval)?))?,
            Frequency::Weekly => self
                .first_week_start()?
                .checked_add_days(Days::new(period.checked_mul(self.interval)?.checked_mul(7)?))?,
            Frequency::Monthly => {
                let (year, month) = self.month_of(period)?;
                NaiveDate::from_ymd_opt(year, month, 1)?
            }
        };
        Some(self.at(date))
    }

    fn candidates(&self, period: u64) -> Vec<DateTime<Utc>> {
        if period == 0 && self.frequency != Frequency::Weekly {
            return vec![self.base_start];
        }

        match self.frequency {
            Frequency::Daily => self.period_start(period).into_iter().collect(),
            Frequency::Weekly => {
                let Some(week_start) = self.period_start(period).map(|s| s.date_naive()) else {
                    return Vec::new();
                };
                let mut starts = Vec::with_capacity(self.weekdays.len() + 1);
                if period == 0 {
                    starts.push(self.base_start);
                }
                for day in self.weekdays.iter() {
                    let offset = u64::from(day.num_days_from_monday());
                    if let Some(date) = week_start.checked_add_days(Days::new(offset)) {
                        let start = self.at(date);
                        if start > self.base_start {
                            starts.push(start);
                        }
                    }
                }
                starts
            }
            // Months without the base day of month are skipped, not clamped.
            Frequency::Monthly => self
                .month_of(period)
                .and_then(|(year, month)| NaiveDate::from_ymd_opt(year, month, self.base_date.day()))
                .map(|date| self.at(date))
                .into_iter()
                .collect(),
        }
    }

    /// First period that can contain an occurrence ending after
    /// `window.from`. Counted rules always start from period 0 because every
    /// earlier candidate consumes part of the count.
    fn first_period(&self, rule: &RecurrenceRule, window: &OccurrenceWindow, duration: Duration) -> u64 {
        if matches!(rule.termination, Termination::Count(_)) {
            return 0;
        }
        let Some(horizon) = window.from.checked_sub_signed(duration) else {
            return 0;
        };
        if horizon <= self.base_start {
            return 0;
        }

        let elapsed = match self.frequency {
            Frequency::Daily => (horizon - self.base_start).num_days() / self.interval as i64,
            Frequency::Weekly => (horizon - self.base_start).num_days() / (self.interval as i64 * 7),
            Frequency::Monthly => {
                let months = (i64::from(horizon.year()) - i64::from(self.base_date.year())) * 12
                    + i64::from(horizon.month0())
                    - i64::from(self.base_date.month0());
                months / self.interval as i64
            }
        };
        u64::try_from(elapsed - 1).unwrap_or(0)
    }
}
