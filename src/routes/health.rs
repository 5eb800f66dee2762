// src/routes/health.rs
//! Liveness endpoint.
//!
//! `/health` answers without touching the database so orchestrators can probe
//! the process cheaply. It also reports whether the report subgraph is wired
//! and how many run reports the registry currently holds.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::pipeline::Orchestrator;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    report_source: bool,
    tracked_runs: usize,
}

/// Handle `GET /health`.
async fn health(State(orchestrator): State<Orchestrator>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        report_source: orchestrator.report_enabled(),
        tracked_runs: orchestrator.runs().len().await,
    })
}

pub fn router() -> Router<Orchestrator> {
    Router::new().route("/health", get(health))
}
