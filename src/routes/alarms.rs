//! Alarm policy endpoints. Policies are validated in full before anything is
//! written.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::error_response;
use crate::error::PipelineError;
use crate::models::{AlarmConfig, PlantId};
use crate::pipeline::Orchestrator;

// ---

pub fn router() -> Router<Orchestrator> {
    // ---
    Router::new().route("/plants/{plant_id}/alarm", get(get_alarm).put(put_alarm))
}

/// Loosely typed so bad values surface as validation errors, not body rejections.
#[derive(Debug, Deserialize)]
struct AlarmBody {
    metric_type: String,
    threshold_value: Value,
}

async fn get_alarm(
    State(orchestrator): State<Orchestrator>,
    Path(plant_id): Path<PlantId>,
) -> Response {
    // ---
    match orchestrator.store().alarm_config(plant_id).await {
        Ok(Some(config)) => (StatusCode::OK, Json(config)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "failure",
                "message": format!("no alarm for plant {plant_id}")
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn put_alarm(
    State(orchestrator): State<Orchestrator>,
    Path(plant_id): Path<PlantId>,
    body: Result<Json<AlarmBody>, JsonRejection>,
) -> Response {
    // ---
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!("PUT /plants/{}/alarm - rejected body: {}", plant_id, rejection);
            return error_response(&PipelineError::Validation(rejection.body_text()));
        }
    };

    let config = match AlarmConfig::parse(plant_id, &body.metric_type, &body.threshold_value) {
        Ok(config) => config,
        Err(e) => return error_response(&e),
    };

    if let Err(e) = orchestrator.store().upsert_alarm_config(&config).await {
        return error_response(&e);
    }

    info!(
        plant_id,
        metric = %config.metric_type,
        threshold = config.threshold_pct,
        "Alarm policy updated"
    );
    (StatusCode::OK, Json(config)).into_response()
}
