use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;

use pv_sentinel::models::{AlarmConfig, AlertRecord, AlertStatus, MetricType};
use pv_sentinel::pipeline::{
    EvaluationContext, Orchestrator, Payload, RawPayload, RunOutput, RunState, SourceFormat,
};
use pv_sentinel::store::{MemoryStore, Store};

// ---

const PLANT: i64 = 7;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 23).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 23, 6, 0, 0).unwrap()
}

fn setup() -> (Arc<MemoryStore>, Orchestrator) {
    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(store.clone(), None).unwrap();
    (store, orch)
}

fn yield_payload(read_date: NaiveDate, yield_kwh: f64) -> RawPayload {
    RawPayload::new(
        SourceFormat::Json,
        Payload::Structured(json!({
            "data": { "yield_kwh": yield_kwh, "read_date": read_date.to_string() }
        })),
        Some(PLANT),
    )
}

/// Ingest one yield reading per `(days_before_today, value)`, each loaded on
/// its own read date.
async fn ingest_history(orch: &Orchestrator, history: &[(i64, f64)]) {
    for &(days_back, value) in history {
        let date = today() - Duration::days(days_back);
        let report = orch.run_ingestion_on(yield_payload(date, value), date).await;
        assert!(report.succeeded(), "{:?}", report.errors);
    }
}

async fn yield_alarm(store: &MemoryStore, pct: f64) {
    store
        .upsert_alarm_config(&AlarmConfig {
            plant_id: PLANT,
            metric_type: MetricType::Yield,
            threshold_pct: pct,
        })
        .await
        .unwrap();
}

fn old_alert(id: i64, read_date: NaiveDate) -> AlertRecord {
    AlertRecord {
        id,
        plant_id: PLANT,
        reading_id: 1,
        read_date,
        metric_type: MetricType::Yield,
        threshold_value: 80.0,
        actual_value: 90.0,
        status: AlertStatus::Ok,
        triggered_at: None,
        avg_value: 100.0,
        valid: true,
        unread: true,
        created_at: now(),
    }
}

#[tokio::test]
async fn reingest_converges_to_one_valid_reading() -> Result<()> {
    // ---
    let (store, orch) = setup();

    for value in [300.0, 310.0, 320.0] {
        let report = orch
            .run_ingestion_on(yield_payload(today(), value), today())
            .await;
        assert!(report.succeeded());
    }

    let history = store.reading_history(PLANT, today()).await?;
    assert_eq!(history.len(), 3);
    let valid: Vec<_> = history.iter().filter(|r| r.valid).collect();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].metrics.yield_kwh, Some(320.0));
    Ok(())
}

#[tokio::test]
async fn missing_read_date_falls_back_to_load_date() {
    // ---
    let (_store, orch) = setup();
    let payload = RawPayload::new(
        SourceFormat::Json,
        Payload::Structured(json!({ "yield_kwh": 12.5 })),
        Some(PLANT),
    );

    let report = orch.run_ingestion_on(payload, today()).await;
    let Some(RunOutput::Ingested { reading }) = report.output else {
        panic!("expected an ingested reading");
    };
    assert_eq!(reading.read_date, today());
    assert_eq!(reading.load_date, today());
}

#[tokio::test]
async fn reading_below_threshold_triggers_alert() -> Result<()> {
    // ---
    let (store, orch) = setup();
    yield_alarm(&store, 80.0).await;
    // Six earlier days plus today's 75 average exactly 100
    ingest_history(
        &orch,
        &[(6, 105.0), (5, 105.0), (4, 105.0), (3, 105.0), (2, 105.0), (1, 100.0), (0, 75.0)],
    )
    .await;

    let report = orch.run_alerts(EvaluationContext { today: today(), now: now() }).await;
    assert_eq!(report.state, RunState::Succeeded, "{:?}", report.errors);

    let alert = store
        .current_alert(PLANT, today(), MetricType::Yield)
        .await?
        .expect("alert recorded");
    assert_eq!(alert.status, AlertStatus::Triggered);
    assert_eq!(alert.threshold_value, 80.0);
    assert_eq!(alert.actual_value, 75.0);
    assert_eq!(alert.avg_value, 100.0);
    assert_eq!(alert.triggered_at, Some(now()));
    assert!(alert.unread);
    Ok(())
}

#[tokio::test]
async fn rerun_without_new_data_adds_no_alert() {
    // ---
    let (store, orch) = setup();
    yield_alarm(&store, 80.0).await;
    ingest_history(
        &orch,
        &[(6, 105.0), (5, 105.0), (4, 105.0), (3, 105.0), (2, 105.0), (1, 100.0), (0, 75.0)],
    )
    .await;
    let eval = EvaluationContext { today: today(), now: now() };

    orch.run_alerts(eval).await;
    let writes = store.write_count().await;
    let second = orch
        .run_alerts(EvaluationContext {
            now: now() + Duration::minutes(15),
            ..eval
        })
        .await;

    assert!(second.succeeded());
    assert_eq!(store.all_alerts().await.len(), 1);
    assert_eq!(store.write_count().await, writes);
    let Some(RunOutput::Alerting { alerts: Some(summary), .. }) = second.output else {
        panic!("expected an alerting summary");
    };
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.inserted, 0);
}

#[tokio::test]
async fn corrected_reading_supersedes_alert() -> Result<()> {
    // ---
    let (store, orch) = setup();
    yield_alarm(&store, 80.0).await;
    ingest_history(
        &orch,
        &[(6, 105.0), (5, 105.0), (4, 105.0), (3, 105.0), (2, 105.0), (1, 100.0), (0, 75.0)],
    )
    .await;
    let eval = EvaluationContext { today: today(), now: now() };
    orch.run_alerts(eval).await;

    // Portal re-publishes the day with a healthy value
    ingest_history(&orch, &[(0, 104.0)]).await;
    orch.run_alerts(eval).await;

    let alerts = store.all_alerts().await;
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts.iter().filter(|a| a.valid).count(), 1);
    let current = store
        .current_alert(PLANT, today(), MetricType::Yield)
        .await?
        .expect("valid alert");
    assert_eq!(current.status, AlertStatus::Ok);
    assert_eq!(current.actual_value, 104.0);
    Ok(())
}

#[tokio::test]
async fn sparse_history_yields_not_available() -> Result<()> {
    // ---
    let (store, orch) = setup();
    yield_alarm(&store, 80.0).await;
    ingest_history(&orch, &[(3, 100.0), (1, 100.0), (0, 1.0)]).await;

    orch.run_alerts(EvaluationContext { today: today(), now: now() }).await;

    let alert = store
        .current_alert(PLANT, today(), MetricType::Yield)
        .await?
        .expect("alert recorded");
    assert_eq!(alert.status, AlertStatus::NotAvailable);
    assert_eq!(alert.threshold_value, -1.0);
    assert_eq!(alert.avg_value, -1.0);
    assert_eq!(alert.triggered_at, None);
    Ok(())
}

#[tokio::test]
async fn plants_without_alarm_are_not_evaluated() {
    // ---
    let (store, orch) = setup();
    ingest_history(&orch, &[(0, 10.0)]).await;

    let report = orch.run_alerts(EvaluationContext { today: today(), now: now() }).await;
    assert!(report.succeeded());
    assert!(store.all_alerts().await.is_empty());
}

#[tokio::test]
async fn retention_sweep_drops_only_expired_alerts() {
    // ---
    let (store, orch) = setup();
    store.seed_alert(old_alert(1, today() - Duration::days(400))).await;
    store.seed_alert(old_alert(2, today() - Duration::days(100))).await;

    let report = orch.run_alerts(EvaluationContext { today: today(), now: now() }).await;
    assert!(report.succeeded());

    let remaining: Vec<i64> = store.all_alerts().await.iter().map(|a| a.id).collect();
    assert_eq!(remaining, vec![2]);
    let Some(RunOutput::Alerting { purged, .. }) = report.output else {
        panic!("expected an alerting output");
    };
    assert_eq!(purged, Some(1));
}

#[tokio::test]
async fn rejected_payloads_write_nothing() {
    // ---
    let (store, orch) = setup();

    let empty = RawPayload::new(SourceFormat::Json, Payload::Structured(json!([])), Some(PLANT));
    let report = orch.run_ingestion_on(empty, today()).await;
    assert_eq!(report.errors[0].code, "empty_dataset");

    let garbage = RawPayload::new(
        SourceFormat::Json,
        Payload::Text("\u{1}\u{2}not json".to_string()),
        Some(PLANT),
    );
    let report = orch.run_ingestion_on(garbage, today()).await;
    assert_eq!(report.errors[0].code, "malformed_input");

    let header_only = RawPayload::new(
        SourceFormat::Csv,
        Payload::Text("Plant ID,Yield (kWh)\n".to_string()),
        None,
    );
    let report = orch.run_ingestion_on(header_only, today()).await;
    assert_eq!(report.errors[0].code, "empty_dataset");

    for body in [json!({}), json!({ "data": {} })] {
        let empty_row = RawPayload::new(SourceFormat::Json, Payload::Structured(body), Some(PLANT));
        let report = orch.run_ingestion_on(empty_row, today()).await;
        assert_eq!(report.errors[0].code, "malformed_input");
    }

    let unknown_headers = RawPayload::new(
        SourceFormat::Csv,
        Payload::Text("foo,bar\n1,2\n".to_string()),
        Some(PLANT),
    );
    let report = orch.run_ingestion_on(unknown_headers, today()).await;
    assert_eq!(report.errors[0].code, "malformed_input");

    assert_eq!(store.write_count().await, 0);
}

#[tokio::test]
async fn empty_object_keeps_existing_reading() -> Result<()> {
    // ---
    let (store, orch) = setup();
    ingest_history(&orch, &[(0, 300.0)]).await;

    let empty = RawPayload::new(SourceFormat::Json, Payload::Text("{}".to_string()), Some(PLANT));
    let report = orch.run_ingestion_on(empty, today()).await;
    assert_eq!(report.state, RunState::Failed);

    let history = store.reading_history(PLANT, today()).await?;
    assert_eq!(history.len(), 1);
    assert!(history[0].valid);
    assert_eq!(history[0].metrics.yield_kwh, Some(300.0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reingest_leaves_one_valid_reading() -> Result<()> {
    // ---
    const RUNS: usize = 50;
    let (store, orch) = setup();

    let handles: Vec<_> = (0..RUNS)
        .map(|i| {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.run_ingestion_on(yield_payload(today(), 100.0 + i as f64), today())
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await?.succeeded());
    }

    let history = store.reading_history(PLANT, today()).await?;
    assert_eq!(history.len(), RUNS);
    assert_eq!(history.iter().filter(|r| r.valid).count(), 1);
    Ok(())
}

#[tokio::test]
async fn failing_plant_does_not_block_others() -> Result<()> {
    // ---
    let (store, orch) = setup();
    for plant_id in [1, 2] {
        store
            .upsert_alarm_config(&AlarmConfig {
                plant_id,
                metric_type: MetricType::Power,
                threshold_pct: 80.0,
            })
            .await?;
    }

    let with_power = RawPayload::new(
        SourceFormat::Json,
        Payload::Structured(json!({ "peak_ac_power_kw": 70.0, "yield_kwh": 300.0 })),
        Some(1),
    );
    let without_power = RawPayload::new(
        SourceFormat::Json,
        Payload::Structured(json!({ "yield_kwh": 310.0 })),
        Some(2),
    );
    assert!(orch.run_ingestion_on(with_power, today()).await.succeeded());
    assert!(orch.run_ingestion_on(without_power, today()).await.succeeded());

    let report = orch.run_alerts(EvaluationContext { today: today(), now: now() }).await;
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].code, "alert_evaluation_failed");
    assert!(report.errors[0].message.contains("plant 2"));

    let Some(RunOutput::Alerting { alerts: Some(summary), .. }) = report.output else {
        panic!("expected an alerting summary");
    };
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.failures.len(), 1);

    let alerts = store.all_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].plant_id, 1);
    assert!(store.current_alert(2, today(), MetricType::Power).await?.is_none());
    Ok(())
}
