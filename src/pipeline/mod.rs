//! Ingestion and alerting pipeline.
//!
//! Stages (normalize, ingest, alerts, retention) are plain functions over a
//! [`Store`](crate::store::Store); `graph` and `orchestrator` compose them
//! into runnable task graphs, and `scheduler` triggers the alerting graph.

pub mod alerts;
pub mod graph;
pub mod ingest;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod retention;
pub mod scheduler;

pub use alerts::{AlertRunSummary, EvaluationContext};
pub use normalize::{Payload, RawPayload, SourceFormat};
pub use orchestrator::{Orchestrator, RunOutput, RunRegistry, RunReport, RunState};
pub use report::{HttpReportSource, ReportSettings, ReportSource};
pub use scheduler::{spawn_alert_schedule, DEFAULT_ALERT_INTERVAL};
