//! Pipeline orchestrator: wires the stages into task graphs and runs them.
//!
//! Graphs:
//! - `ingestion`:   normalize -> ingest (on demand, caller supplies the payload)
//! - `report`:      download_report -> normalize -> ingest (on demand)
//! - `alerting`:    sweep_alerts, evaluate_alerts (independent; scheduled)
//!
//! Every invocation gets a run id and moves `pending -> running ->
//! succeeded | failed`. Reports are kept in a bounded in-memory registry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::alerts::{run_alert_engine, AlertRunSummary, EvaluationContext};
use super::graph::{GraphError, Task, TaskGraph, TaskReport, TaskState};
use super::ingest::ingest;
use super::normalize::{normalize, Payload, RawPayload, SourceFormat};
use super::report::ReportSettings;
use super::retention::sweep_alerts;
use crate::error::{ErrorKind, ErrorPayload, PipelineError, Result};
use crate::models::{CanonicalRecord, Reading};
use crate::store::Store;

// ---

/// Number of run reports kept for status lookups.
pub const RUN_HISTORY_LIMIT: usize = 500;

/// Shared state of the ingestion and report graphs.
#[derive(Debug)]
pub struct IngestContext {
    // ---
    pub payload: Option<RawPayload>,
    pub load_date: NaiveDate,
    pub record: Option<CanonicalRecord>,
    pub reading: Option<Reading>,
}

impl IngestContext {
    pub fn new(payload: Option<RawPayload>, load_date: NaiveDate) -> Self {
        Self {
            payload,
            load_date,
            record: None,
            reading: None,
        }
    }
}

/// Shared state of the alerting graph.
#[derive(Debug)]
pub struct MaintenanceContext {
    pub eval: EvaluationContext,
    pub purged: Option<u64>,
    pub summary: Option<AlertRunSummary>,
}

// --- tasks

struct DownloadReport {
    settings: ReportSettings,
}

#[async_trait]
impl Task<IngestContext> for DownloadReport {
    fn name(&self) -> &'static str {
        "download_report"
    }

    async fn run(&self, ctx: &mut IngestContext) -> Result<()> {
        let text = self.settings.source.fetch().await?;
        ctx.payload = Some(RawPayload {
            format: SourceFormat::Csv,
            body: Payload::Text(text),
            plant_id: self.settings.plant_id,
            header_row: self.settings.header_row,
        });
        Ok(())
    }
}

struct Normalize;

#[async_trait]
impl Task<IngestContext> for Normalize {
    fn name(&self) -> &'static str {
        "normalize"
    }

    async fn run(&self, ctx: &mut IngestContext) -> Result<()> {
        let payload = ctx
            .payload
            .as_ref()
            .ok_or_else(|| PipelineError::MalformedInput("no payload supplied".to_string()))?;
        ctx.record = Some(normalize(payload)?);
        Ok(())
    }
}

struct Ingest {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Task<IngestContext> for Ingest {
    fn name(&self) -> &'static str {
        "ingest"
    }

    async fn run(&self, ctx: &mut IngestContext) -> Result<()> {
        let record = ctx
            .record
            .as_ref()
            .ok_or_else(|| PipelineError::MalformedInput("no normalized record".to_string()))?;
        ctx.reading = Some(ingest(self.store.as_ref(), record, ctx.load_date).await?);
        Ok(())
    }
}

struct SweepAlerts {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Task<MaintenanceContext> for SweepAlerts {
    fn name(&self) -> &'static str {
        "sweep_alerts"
    }

    async fn run(&self, ctx: &mut MaintenanceContext) -> Result<()> {
        ctx.purged = Some(sweep_alerts(self.store.as_ref(), ctx.eval.today).await?);
        Ok(())
    }
}

struct EvaluateAlerts {
    store: Arc<dyn Store>,
}

#[async_trait]
impl Task<MaintenanceContext> for EvaluateAlerts {
    fn name(&self) -> &'static str {
        "evaluate_alerts"
    }

    async fn run(&self, ctx: &mut MaintenanceContext) -> Result<()> {
        let summary = run_alert_engine(self.store.as_ref(), &ctx.eval).await?;
        let failures = summary.failures.clone();
        ctx.summary = Some(summary);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::AlertEvaluation(failures))
        }
    }
}

// --- run reports

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// What a run produced, when it got that far.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutput {
    Ingested {
        reading: Reading,
    },
    Alerting {
        purged: Option<u64>,
        alerts: Option<AlertRunSummary>,
    },
}

/// Status of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    // ---
    pub run_id: Uuid,
    pub graph: &'static str,
    pub state: RunState,
    pub tasks: Vec<TaskReport>,
    pub errors: Vec<ErrorPayload>,
    pub output: Option<RunOutput>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    // ---
    fn pending(graph: &'static str, tasks: Vec<TaskReport>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            graph,
            state: RunState::Pending,
            tasks,
            errors: Vec::new(),
            output: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// `None` for successful runs; otherwise `Internal` if any failure was
    /// internal, else `Validation`.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        // ---
        if self.succeeded() {
            return None;
        }
        if self.errors.iter().any(|e| e.kind == ErrorKind::Internal) || self.errors.is_empty() {
            Some(ErrorKind::Internal)
        } else {
            Some(ErrorKind::Validation)
        }
    }
}

/// Bounded, shared store of recent run reports.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    reports: HashMap<Uuid, RunReport>,
    order: VecDeque<Uuid>,
}

impl RunRegistry {
    // ---
    pub async fn record(&self, report: RunReport) {
        // ---
        let mut inner = self.inner.write().await;
        if !inner.reports.contains_key(&report.run_id) {
            inner.order.push_back(report.run_id);
            while inner.order.len() > RUN_HISTORY_LIMIT {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.reports.remove(&oldest);
                }
            }
        }
        inner.reports.insert(report.run_id, report);
    }

    pub async fn get(&self, run_id: &Uuid) -> Option<RunReport> {
        self.inner.read().await.reports.get(run_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.reports.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// --- orchestrator

/// Owns the task graphs and runs them on request.
#[derive(Clone)]
pub struct Orchestrator {
    // ---
    store: Arc<dyn Store>,
    runs: RunRegistry,
    ingestion: Arc<TaskGraph<IngestContext>>,
    alerting: Arc<TaskGraph<MaintenanceContext>>,
    report: Option<Arc<TaskGraph<IngestContext>>>,
}

impl Orchestrator {
    // ---
    pub fn new(
        store: Arc<dyn Store>,
        report: Option<ReportSettings>,
    ) -> std::result::Result<Self, GraphError> {
        // ---
        let ingestion = TaskGraph::<IngestContext>::builder("ingestion")
            .task(Normalize, &[])
            .task(
                Ingest {
                    store: store.clone(),
                },
                &["normalize"],
            )
            .build()?;

        let alerting = TaskGraph::<MaintenanceContext>::builder("alerting")
            .task(
                SweepAlerts {
                    store: store.clone(),
                },
                &[],
            )
            .task(
                EvaluateAlerts {
                    store: store.clone(),
                },
                &[],
            )
            .build()?;

        let report = report
            .map(|settings| {
                TaskGraph::<IngestContext>::builder("report")
                    .task(DownloadReport { settings }, &[])
                    .task(Normalize, &["download_report"])
                    .task(
                        Ingest {
                            store: store.clone(),
                        },
                        &["normalize"],
                    )
                    .build()
                    .map(Arc::new)
            })
            .transpose()?;

        Ok(Self {
            store,
            runs: RunRegistry::default(),
            ingestion: Arc::new(ingestion),
            alerting: Arc::new(alerting),
            report,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn report_enabled(&self) -> bool {
        self.report.is_some()
    }

    /// On-demand ingestion of a caller-supplied payload, loaded today.
    pub async fn run_ingestion(&self, payload: RawPayload) -> RunReport {
        self.run_ingestion_on(payload, Utc::now().date_naive()).await
    }

    /// On-demand ingestion with an explicit load date.
    pub async fn run_ingestion_on(&self, payload: RawPayload, load_date: NaiveDate) -> RunReport {
        // ---
        let mut ctx = IngestContext::new(Some(payload), load_date);
        let mut report = self.execute(&self.ingestion, &mut ctx).await;
        report.output = ctx.reading.map(|reading| RunOutput::Ingested { reading });
        self.finish(report).await
    }

    /// Download the upstream report and ingest it. `None` when no report
    /// source is configured.
    pub async fn run_report(&self) -> Option<RunReport> {
        // ---
        let graph = self.report.as_ref()?;
        let mut ctx = IngestContext::new(None, Utc::now().date_naive());
        let mut report = self.execute(graph, &mut ctx).await;
        report.output = ctx.reading.map(|reading| RunOutput::Ingested { reading });
        Some(self.finish(report).await)
    }

    /// Retention sweep plus alert evaluation as of `eval`.
    pub async fn run_alerts(&self, eval: EvaluationContext) -> RunReport {
        // ---
        let mut ctx = MaintenanceContext {
            eval,
            purged: None,
            summary: None,
        };
        let mut report = self.execute(&self.alerting, &mut ctx).await;
        report.output = Some(RunOutput::Alerting {
            purged: ctx.purged,
            alerts: ctx.summary,
        });
        self.finish(report).await
    }

    async fn execute<C: Send + 'static>(&self, graph: &TaskGraph<C>, ctx: &mut C) -> RunReport {
        // ---
        let mut report = RunReport::pending(graph.name(), graph.pending_reports());
        self.runs.record(report.clone()).await;

        report.state = RunState::Running;
        report.started_at = Some(Utc::now());
        self.runs.record(report.clone()).await;

        let span = info_span!("run", run_id = %report.run_id, graph = graph.name());
        let tasks = graph.run(ctx).instrument(span).await;

        report.errors = tasks.iter().filter_map(|t| t.error.clone()).collect();
        report.state = if tasks.iter().all(|t| t.state == TaskState::Succeeded) {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        report.tasks = tasks;
        report.finished_at = Some(Utc::now());
        report
    }

    async fn finish(&self, report: RunReport) -> RunReport {
        // ---
        match report.state {
            RunState::Succeeded => {
                info!(run_id = %report.run_id, graph = report.graph, "Run succeeded")
            }
            _ => warn!(
                run_id = %report.run_id,
                graph = report.graph,
                errors = report.errors.len(),
                "Run failed"
            ),
        }
        self.runs.record(report.clone()).await;
        report
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    struct StaticReport(&'static str);

    #[async_trait]
    impl crate::pipeline::report::ReportSource for StaticReport {
        async fn fetch(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct DownReport;

    #[async_trait]
    impl crate::pipeline::report::ReportSource for DownReport {
        async fn fetch(&self) -> Result<String> {
            Err(PipelineError::UpstreamUnavailable("portal offline".into()))
        }
    }

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
        Orchestrator::new(store, None).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 23).unwrap()
    }

    #[tokio::test]
    async fn test_ingestion_run_succeeds_and_is_registered() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(store.clone());
        let payload = RawPayload::new(
            SourceFormat::Json,
            Payload::Structured(json!({"yield_kwh": 360, "read_date": "2025-05-22"})),
            Some(4),
        );

        let report = orch.run_ingestion_on(payload, today()).await;
        assert!(report.succeeded());
        assert_eq!(report.failure_kind(), None);
        let Some(RunOutput::Ingested { reading }) = &report.output else {
            panic!("expected an ingested reading");
        };
        assert_eq!(reading.plant_id, 4);

        let stored = orch.runs().get(&report.run_id).await.unwrap();
        assert_eq!(stored.state, RunState::Succeeded);
    }

    #[tokio::test]
    async fn test_bad_payload_fails_as_validation_and_skips_ingest() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(store.clone());
        let payload = RawPayload::new(SourceFormat::Json, Payload::Structured(json!([])), Some(4));

        let report = orch.run_ingestion_on(payload, today()).await;
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.failure_kind(), Some(ErrorKind::Validation));
        assert_eq!(report.errors[0].code, "empty_dataset");
        assert_eq!(report.tasks[1].state, TaskState::Skipped);
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_storage_outage_fails_as_internal() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true).await;
        let orch = orchestrator(store.clone());
        let payload = RawPayload::new(
            SourceFormat::Json,
            Payload::Structured(json!({"yield_kwh": 1})),
            Some(4),
        );

        let report = orch.run_ingestion_on(payload, today()).await;
        assert_eq!(report.failure_kind(), Some(ErrorKind::Internal));
        assert_eq!(report.errors[0].code, "storage_unavailable");
    }

    #[tokio::test]
    async fn test_report_graph_downloads_and_ingests() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let settings = ReportSettings {
            source: Arc::new(StaticReport(
                "Inverter Report\nYield (kWh),Peak AC Power (kW)\n310.5,70\n",
            )),
            plant_id: Some(11),
            header_row: 1,
        };
        let orch = Orchestrator::new(store.clone(), Some(settings)).unwrap();
        assert!(orch.report_enabled());

        let report = orch.run_report().await.unwrap();
        assert!(report.succeeded(), "{:?}", report.errors);
        let names: Vec<_> = report.tasks.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["download_report", "normalize", "ingest"]);

        let history = store
            .reading_history(11, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].metrics.yield_kwh, Some(310.5));
    }

    #[tokio::test]
    async fn test_report_download_failure_is_internal() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let settings = ReportSettings {
            source: Arc::new(DownReport),
            plant_id: Some(11),
            header_row: 1,
        };
        let orch = Orchestrator::new(store.clone(), Some(settings)).unwrap();

        let report = orch.run_report().await.unwrap();
        assert_eq!(report.failure_kind(), Some(ErrorKind::Internal));
        assert_eq!(report.tasks[1].state, TaskState::Skipped);
        assert_eq!(report.tasks[2].state, TaskState::Skipped);
    }

    #[tokio::test]
    async fn test_report_disabled_without_settings() {
        // ---
        let orch = orchestrator(Arc::new(MemoryStore::new()));
        assert!(orch.run_report().await.is_none());
    }

    #[tokio::test]
    async fn test_registry_is_bounded() {
        // ---
        let registry = RunRegistry::default();
        let mut first = None;
        for _ in 0..(RUN_HISTORY_LIMIT + 5) {
            let report = RunReport::pending("alerting", Vec::new());
            first.get_or_insert(report.run_id);
            registry.record(report).await;
        }
        assert_eq!(registry.len().await, RUN_HISTORY_LIMIT);
        assert!(registry.get(&first.unwrap()).await.is_none());
    }
}
