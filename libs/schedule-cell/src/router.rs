use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use shared_config::AppConfig;

use crate::handlers;

pub fn schedule_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::create_schedule))
        .route(
            "/{schedule_id}/occurrences",
            get(handlers::list_occurrences)
                .put(handlers::edit_occurrence)
                .delete(handlers::delete_occurrence),
        )
        .route("/{schedule_id}/occurrences/classify", post(handlers::classify_occurrence_edit))
        .with_state(state)
}
