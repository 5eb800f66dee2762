//! Alert listing and acknowledgement.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use super::error_response;
use crate::models::AlertFilter;
use crate::pipeline::Orchestrator;

// ---

pub fn router() -> Router<Orchestrator> {
    // ---
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts/{alert_id}/read", post(mark_read))
}

async fn list_alerts(
    State(orchestrator): State<Orchestrator>,
    Query(filter): Query<AlertFilter>,
) -> Response {
    // ---
    match orchestrator.store().list_alerts(&filter).await {
        Ok(alerts) => (StatusCode::OK, Json(alerts)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn mark_read(
    State(orchestrator): State<Orchestrator>,
    Path(alert_id): Path<i64>,
) -> Response {
    // ---
    match orchestrator.store().mark_alert_read(alert_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "failure", "message": format!("unknown alert {alert_id}") })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}
