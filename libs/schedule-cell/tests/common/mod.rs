#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use schedule_cell::{
    expand_schedule, plan_delete, plan_edit, ApplyScheduleRequest, DeleteOccurrenceRequest,
    ExpansionOptions, NewSchedule, OccurrenceWindow, PlanStep, ScheduleError, ScheduleFields,
    ScheduleRecord, ScheduleStore,
};

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn hour(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap()
}

pub fn fields(doctor_id: Uuid, location_id: Uuid, start: u32, end: u32) -> ScheduleFields {
    ScheduleFields {
        doctor_id,
        location_id,
        start_time_of_day: hour(start),
        end_time_of_day: hour(end),
    }
}

/// Schedule store held in memory. Plans are applied the same way the
/// database function applies them, under one lock.
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<Uuid, ScheduleRecord>>,
}

impl InMemoryStore {
    /// Every visible occurrence across all rows within `window`, ascending.
    pub fn occurrences(&self, window: &OccurrenceWindow) -> Vec<DateTime<Utc>> {
        let mut starts: Vec<_> = self
            .rows()
            .iter()
            .flat_map(|row| expand_schedule(row, window, &ExpansionOptions::default()).unwrap())
            .map(|occurrence| occurrence.start_time)
            .collect();
        starts.sort();
        starts
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ScheduleRecord) {
        self.rows.lock().unwrap().insert(record.id, record);
    }

    pub fn row(&self, id: Uuid) -> Option<ScheduleRecord> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    /// All rows, oldest series start first.
    pub fn rows(&self) -> Vec<ScheduleRecord> {
        let mut rows: Vec<_> = self.rows.lock().unwrap().values().cloned().collect();
        rows.sort_by_key(|row| row.start_time);
        rows
    }

    fn apply(&self, schedule_id: Uuid, expected_version: Option<i64>, plan: impl FnOnce(&ScheduleRecord) -> Result<Vec<PlanStep>, ScheduleError>) -> Result<(), ScheduleError> {
        let mut rows = self.rows.lock().unwrap();
        let current = rows
            .get(&schedule_id)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound(schedule_id.to_string()))?;

        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(ScheduleError::Conflict(format!(
                    "schedule {} is at version {}",
                    schedule_id, current.version
                )));
            }
        }

        for step in plan(&current)? {
            match step {
                PlanStep::UpdateSchedule { doctor_id, location_id, start_time, end_time, recurrence_rule } => {
                    if let Some(row) = rows.get_mut(&schedule_id) {
                        row.doctor_id = doctor_id;
                        row.location_id = location_id;
                        row.start_time = start_time;
                        row.end_time = end_time;
                        row.recurrence_rule = recurrence_rule;
                        row.version += 1;
                    }
                }
                PlanStep::TruncateSchedule { recurrence_rule, drop_exceptions_from } => {
                    if let Some(row) = rows.get_mut(&schedule_id) {
                        row.recurrence_rule = Some(recurrence_rule);
                        row.exceptions.retain(|start| *start < drop_exceptions_from);
                        row.version += 1;
                    }
                }
                PlanStep::ShiftExceptions { offset_seconds } => {
                    if let Some(row) = rows.get_mut(&schedule_id) {
                        for start in row.exceptions.iter_mut() {
                            *start += Duration::seconds(offset_seconds);
                        }
                        row.version += 1;
                    }
                }
                PlanStep::InsertSchedule { doctor_id, location_id, start_time, end_time, recurrence_rule, exceptions } => {
                    let id = Uuid::new_v4();
                    rows.insert(id, ScheduleRecord {
                        id,
                        doctor_id,
                        location_id,
                        start_time,
                        end_time,
                        recurrence_rule,
                        exceptions,
                        version: 1,
                    });
                }
                PlanStep::InsertException { occurrence_start } => {
                    if let Some(row) = rows.get_mut(&schedule_id) {
                        row.exceptions.push(occurrence_start);
                        row.exceptions.sort();
                        row.version += 1;
                    }
                }
                PlanStep::DeleteSchedule => {
                    rows.remove(&schedule_id);
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn get_schedule(&self, schedule_id: Uuid) -> Result<ScheduleRecord, ScheduleError> {
        self.row(schedule_id)
            .ok_or_else(|| ScheduleError::NotFound(schedule_id.to_string()))
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> Result<ScheduleRecord, ScheduleError> {
        let record = ScheduleRecord {
            id: Uuid::new_v4(),
            doctor_id: schedule.doctor_id,
            location_id: schedule.location_id,
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            recurrence_rule: schedule.recurrence_rule.clone(),
            exceptions: Vec::new(),
            version: 1,
        };
        self.insert(record.clone());
        Ok(record)
    }

    async fn apply_edit(&self, request: &ApplyScheduleRequest) -> Result<(), ScheduleError> {
        self.apply(request.schedule_id, request.expected_version, |current| plan_edit(current, request))
    }

    async fn delete_occurrence(&self, request: &DeleteOccurrenceRequest) -> Result<(), ScheduleError> {
        self.apply(request.schedule_id, request.expected_version, |current| plan_delete(current, request))
    }
}
