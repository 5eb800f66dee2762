//! Error taxonomy for the ingestion and alerting pipeline.
//!
//! Every failure a task can report is a [`PipelineError`]. Each variant knows
//! whether the caller can fix it (bad payload, bad configuration) or whether
//! it is an internal failure (storage, upstream), which is what the trigger
//! API uses to shape its response.

use serde::Serialize;
use thiserror::Error;

// ---

/// Failure raised by a pipeline stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    // ---
    /// Payload is empty, unparsable, or missing a required field.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Payload parsed but carries no data rows.
    #[error("dataset contains no data rows")]
    EmptyDataset,

    /// The relational store rejected or could not serve a request.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Configuration rejected before any write.
    #[error("validation error: {0}")]
    Validation(String),

    /// One or more plants could not be evaluated; the others were.
    #[error("alert evaluation failed for {} plant(s): {}", .0.len(), .0.join("; "))]
    AlertEvaluation(Vec<String>),

    /// The upstream report source could not be reached or answered badly.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

/// Coarse classification surfaced to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller sent something it can correct.
    Validation,
    /// Infrastructure or engine failure.
    Internal,
}

impl PipelineError {
    // ---
    pub fn kind(&self) -> ErrorKind {
        // ---
        match self {
            PipelineError::MalformedInput(_)
            | PipelineError::EmptyDataset
            | PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::StorageUnavailable(_)
            | PipelineError::AlertEvaluation(_)
            | PipelineError::UpstreamUnavailable(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        // ---
        match self {
            PipelineError::MalformedInput(_) => "malformed_input",
            PipelineError::EmptyDataset => "empty_dataset",
            PipelineError::StorageUnavailable(_) => "storage_unavailable",
            PipelineError::Validation(_) => "validation_error",
            PipelineError::AlertEvaluation(_) => "alert_evaluation_failed",
            PipelineError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::StorageUnavailable(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::UpstreamUnavailable(e.to_string())
    }
}

/// Serializable error entry for run reports and API responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    // ---
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl From<&PipelineError> for ErrorPayload {
    fn from(e: &PipelineError) -> Self {
        ErrorPayload {
            kind: e.kind(),
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Convenience alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;
