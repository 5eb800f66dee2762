//! Run endpoints: trigger the alerting or report graph by hand and look up
//! stored run reports.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::status_for;
use crate::pipeline::{EvaluationContext, Orchestrator, RunReport};

// ---

pub fn router() -> Router<Orchestrator> {
    // ---
    Router::new()
        .route("/runs/alerts", post(run_alerts))
        .route("/runs/report", post(run_report))
        .route("/runs/{run_id}", get(get_run))
}

fn report_response(report: RunReport) -> Response {
    let status = report
        .failure_kind()
        .map(status_for)
        .unwrap_or(StatusCode::OK);
    (status, Json(report)).into_response()
}

async fn run_alerts(State(orchestrator): State<Orchestrator>) -> Response {
    // ---
    info!("POST /runs/alerts");
    let report = orchestrator
        .run_alerts(EvaluationContext::at(Utc::now()))
        .await;
    report_response(report)
}

async fn run_report(State(orchestrator): State<Orchestrator>) -> Response {
    // ---
    info!("POST /runs/report");
    match orchestrator.run_report().await {
        Some(report) => report_response(report),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "failure", "message": "no report source configured" })),
        )
            .into_response(),
    }
}

async fn get_run(
    State(orchestrator): State<Orchestrator>,
    Path(run_id): Path<Uuid>,
) -> Response {
    // ---
    match orchestrator.runs().get(&run_id).await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "failure", "message": format!("unknown run {run_id}") })),
        )
            .into_response(),
    }
}
