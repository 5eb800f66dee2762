//! Route gateway (EMBP): each sibling module exports a subrouter and this
//! module merges them, so `main.rs` never sees individual endpoints.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde_json::json;

use crate::error::{ErrorKind, ErrorPayload, PipelineError};
use crate::pipeline::Orchestrator;

mod alarms;
mod alerts;
mod health;
mod ingest;
mod runs;

// ---

pub fn router(orchestrator: Orchestrator) -> Router {
    // ---
    Router::new()
        .merge(ingest::router())
        .merge(runs::router())
        .merge(alarms::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state(orchestrator)
}

/// HTTP status for a failure class.
fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Plain error body for endpoints outside the run model.
fn error_response(e: &PipelineError) -> Response {
    // ---
    let payload = ErrorPayload::from(e);
    (
        status_for(payload.kind),
        Json(json!({ "status": "failure", "errors": [payload] })),
    )
        .into_response()
}
