use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::error::ScheduleError;
use crate::models::{
    CreateScheduleRequest, DeleteOccurrenceBody, EditOccurrenceRequest, EditScope, NewSchedule,
    RecurrenceForm, ScheduleRecord,
};
use crate::services::{
    classify, delete_scopes, expand_schedule, occurs_at, Classification, ExpansionOptions,
    OccurrenceEdit, OccurrenceWindow, PresetScope, RecurrenceRule, ScheduleEditApplier,
    ScheduleStore, SupabaseScheduleStore,
};

#[derive(Debug, Deserialize)]
pub struct OccurrenceQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

fn build_rule(
    form: Option<RecurrenceForm>,
    anchor: DateTime<Utc>,
) -> Result<Option<RecurrenceRule>, ScheduleError> {
    form.map(|form| form.into_rule().map(|rule| rule.resolve_weekdays(anchor)))
        .transpose()
}

fn scope_list(scopes: &[EditScope]) -> String {
    scopes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn ensure_occurrence(record: &ScheduleRecord, occurrence_start: DateTime<Utc>) -> Result<(), AppError> {
    if occurs_at(record, occurrence_start).map_err(ScheduleError::from)? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "Schedule {} has no occurrence starting at {}",
            record.id, occurrence_start
        )))
    }
}

#[axum::debug_handler]
pub async fn create_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    if request.start_time >= request.end_time {
        return Err(AppError::ValidationError("Start time must be before end time".to_string()));
    }

    let rule = build_rule(request.recurrence, request.start_time)?;
    if let Some(rule) = &rule {
        rule.validate(request.start_time)?;
    }

    let schedule = NewSchedule {
        doctor_id: request.doctor_id,
        location_id: request.location_id,
        start_time: request.start_time,
        end_time: request.end_time,
        recurrence_rule: rule.as_ref().map(RecurrenceRule::encode),
    };

    let store = SupabaseScheduleStore::new(&state, auth.token());
    let record = store.create_schedule(&schedule).await?;

    Ok(Json(json!(record)))
}

#[axum::debug_handler]
pub async fn list_occurrences(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<Uuid>,
    Query(query): Query<OccurrenceQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let window = OccurrenceWindow::new(query.from, query.to);
    if (window.to - window.from).num_days() > state.schedule_max_window_days {
        return Err(AppError::ValidationError(format!(
            "Occurrence window may span at most {} days",
            state.schedule_max_window_days
        )));
    }

    let store = SupabaseScheduleStore::new(&state, auth.token());
    let record = store.get_schedule(schedule_id).await?;

    let options = ExpansionOptions {
        max_occurrences: state.schedule_max_occurrences,
    };
    let occurrences = expand_schedule(&record, &window, &options).map_err(ScheduleError::from)?;
    debug!("Returning {} occurrences for schedule {}", occurrences.len(), schedule_id);

    Ok(Json(json!({
        "schedule_id": schedule_id,
        "occurrences": occurrences,
        "total": occurrences.len()
    })))
}

#[axum::debug_handler]
pub async fn classify_occurrence_edit(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<EditOccurrenceRequest>,
) -> Result<Json<Value>, AppError> {
    let store = SupabaseScheduleStore::new(&state, auth.token());
    let record = store.get_schedule(schedule_id).await?;

    let old_rule = record.rule().map_err(ScheduleError::from)?;
    let new_rule = build_rule(request.recurrence, request.occurrence_start)?;
    let classification = Classification::from(classify(old_rule.as_ref(), new_rule.as_ref()));

    Ok(Json(json!(classification)))
}

#[axum::debug_handler]
pub async fn edit_occurrence(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<EditOccurrenceRequest>,
) -> Result<Json<Value>, AppError> {
    let applier = ScheduleEditApplier::new(SupabaseScheduleStore::new(&state, auth.token()));
    let record = applier.store().get_schedule(schedule_id).await?;
    ensure_occurrence(&record, request.occurrence_start)?;

    let edit = OccurrenceEdit {
        schedule_id,
        occurrence_start: request.occurrence_start,
        old_rule: record.rule().map_err(ScheduleError::from)?,
        new_rule: build_rule(request.recurrence.clone(), request.occurrence_start)?,
        fields: request.fields(),
        expected_version: Some(record.version),
    };

    match applier.apply(&edit, &PresetScope(request.scope)).await {
        Ok(applied) => Ok(Json(json!(applied))),
        Err(ScheduleError::Cancelled) => {
            let case = classify(edit.old_rule.as_ref(), edit.new_rule.as_ref());
            Err(AppError::BadRequest(format!(
                "A scope is required for a {} edit; choose one of: {}",
                case,
                scope_list(case.offered_scopes())
            )))
        }
        Err(e) => Err(e.into()),
    }
}

#[axum::debug_handler]
pub async fn delete_occurrence(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<DeleteOccurrenceBody>,
) -> Result<Json<Value>, AppError> {
    let applier = ScheduleEditApplier::new(SupabaseScheduleStore::new(&state, auth.token()));
    let record = applier.store().get_schedule(schedule_id).await?;
    ensure_occurrence(&record, request.occurrence_start)?;
    let rule = record.rule().map_err(ScheduleError::from)?;

    let result = applier
        .delete_occurrence(
            schedule_id,
            request.occurrence_start,
            rule.as_ref(),
            Some(record.version),
            &PresetScope(request.scope),
        )
        .await;

    match result {
        Ok(scope) => Ok(Json(json!({
            "schedule_id": schedule_id,
            "occurrence_start": request.occurrence_start,
            "scope": scope
        }))),
        Err(ScheduleError::Cancelled) => Err(AppError::BadRequest(format!(
            "A scope is required for this delete; choose one of: {}",
            scope_list(delete_scopes(rule.as_ref()))
        ))),
        Err(e) => Err(e.into()),
    }
}
