//! `POST /ingest`: on-demand ingestion trigger.
//!
//! Runs the ingestion graph (normalize -> ingest) synchronously and answers
//! with the run verdict. Failures carry a structured error list whose `kind`
//! separates caller mistakes (`validation`, 422) from internal failures
//! (`internal`, 500).

use axum::{
    extract::rejection::JsonRejection, extract::State, http::StatusCode,
    response::IntoResponse, routing::post, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::status_for;
use crate::error::{ErrorPayload, PipelineError};
use crate::models::PlantId;
use crate::pipeline::{Orchestrator, Payload, RawPayload, RunReport, SourceFormat};

// ---

pub fn router() -> Router<Orchestrator> {
    // ---
    Router::new().route("/ingest", post(handler))
}

/// Trigger request: the payload is either raw text (CSV or JSON) or an
/// already structured JSON value.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    source_format: SourceFormat,
    payload: Value,
    plant_id: Option<PlantId>,
}

impl TriggerRequest {
    fn into_raw(self) -> RawPayload {
        let body = match self.payload {
            Value::String(text) => Payload::Text(text),
            other => Payload::Structured(other),
        };
        RawPayload::new(self.source_format, body, self.plant_id)
    }
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorPayload>,
}

impl From<&RunReport> for TriggerResponse {
    fn from(report: &RunReport) -> Self {
        TriggerResponse {
            status: if report.succeeded() { "success" } else { "failure" },
            run_id: Some(report.run_id),
            errors: report.errors.clone(),
        }
    }
}

async fn handler(
    State(orchestrator): State<Orchestrator>,
    body: Result<Json<TriggerRequest>, JsonRejection>,
) -> impl IntoResponse {
    // ---
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("POST /ingest - rejected body: {}", rejection);
            let error = PipelineError::MalformedInput(rejection.body_text());
            let response = TriggerResponse {
                status: "failure",
                run_id: None,
                errors: vec![ErrorPayload::from(&error)],
            };
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(response));
        }
    };

    info!(
        "POST /ingest - format={:?} plant_id={:?}",
        request.source_format, request.plant_id
    );

    let report = orchestrator.run_ingestion(request.into_raw()).await;
    let status = report
        .failure_kind()
        .map(status_for)
        .unwrap_or(StatusCode::OK);

    (status, Json(TriggerResponse::from(&report)))
}
