//! Baseline and alert engine.
//!
//! One pass runs five steps, each a separate function so it can be tested on
//! its own:
//! 1. [`select_candidates`]: newest valid reading per plant loaded today
//! 2. [`compute_baseline`]: trailing-window mean with a sparse-data guard
//! 3. [`classify`]: verdict against the configured threshold
//! 4. [`diff_against_current`]: skip verdicts identical to the valid alert
//! 5. write through [`Store::replace_alert`]
//!
//! Plants are evaluated independently; a failure for one plant is collected
//! and the pass continues with the rest.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::models::{
    AlarmConfig, AlertRecord, AlertStatus, MetricType, NewAlert, PlantId, Reading,
    BASELINE_UNAVAILABLE,
};
use crate::store::Store;

// ---

/// Length of the trailing baseline window, evaluated read date included.
pub const BASELINE_WINDOW_DAYS: i64 = 7;

/// Distinct read dates required inside the window for a usable baseline.
pub const MIN_BASELINE_DAYS: usize = 5;

/// Reference instant of one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext {
    /// Readings loaded on this day are evaluation candidates.
    pub today: NaiveDate,
    /// Stamped into `triggered_at`.
    pub now: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            today: now.date_naive(),
            now,
        }
    }
}

/// Outcome of classifying one reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    // ---
    pub status: AlertStatus,
    pub actual_value: f64,
    pub threshold_value: f64,
    pub avg_value: f64,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// What to do with a verdict given the currently valid alert.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertAction {
    /// Same reading, status and value as the valid alert.
    Unchanged,
    Replace(NewAlert),
}

/// Counters for one engine pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertRunSummary {
    // ---
    pub candidates: usize,
    pub without_config: usize,
    pub inserted: usize,
    pub unchanged: usize,
    pub failures: Vec<String>,
}

/// Step 1: keep, per plant, the valid reading with the latest read date
/// (highest id on ties) among those loaded on `today`.
pub fn select_candidates(fresh: Vec<Reading>, today: NaiveDate) -> Vec<Reading> {
    // ---
    let mut latest: BTreeMap<PlantId, Reading> = BTreeMap::new();
    for reading in fresh
        .into_iter()
        .filter(|r| r.valid && r.load_date == today)
    {
        let newer = latest
            .get(&reading.plant_id)
            .map_or(true, |current| {
                (reading.read_date, reading.id) > (current.read_date, current.id)
            });
        if newer {
            latest.insert(reading.plant_id, reading);
        }
    }
    latest.into_values().collect()
}

/// Inclusive bounds of the baseline window ending at `read_date`.
pub fn window_bounds(read_date: NaiveDate) -> (NaiveDate, NaiveDate) {
    (read_date - Duration::days(BASELINE_WINDOW_DAYS - 1), read_date)
}

/// Step 2: mean of `metric` over valid readings inside the window ending at
/// `read_date`. `None` unless at least [`MIN_BASELINE_DAYS`] distinct read
/// dates contributed a value.
pub fn compute_baseline(
    history: &[Reading],
    metric: MetricType,
    read_date: NaiveDate,
) -> Option<f64> {
    // ---
    let (from, to) = window_bounds(read_date);

    let mut days = BTreeSet::new();
    let mut sum = 0.0;
    let mut count = 0usize;
    for reading in history
        .iter()
        .filter(|r| r.valid && r.read_date >= from && r.read_date <= to)
    {
        if let Some(value) = reading.metrics.value(metric) {
            days.insert(reading.read_date);
            sum += value;
            count += 1;
        }
    }

    if days.len() < MIN_BASELINE_DAYS {
        return None;
    }
    Some(sum / count as f64)
}

/// Step 3: classify `actual` against `threshold_pct` percent of the baseline.
pub fn classify(
    actual: f64,
    baseline: Option<f64>,
    threshold_pct: f64,
    now: DateTime<Utc>,
) -> Verdict {
    // ---
    match baseline {
        None => Verdict {
            status: AlertStatus::NotAvailable,
            actual_value: actual,
            threshold_value: BASELINE_UNAVAILABLE,
            avg_value: BASELINE_UNAVAILABLE,
            triggered_at: None,
        },
        Some(avg) => {
            let threshold_value = avg * threshold_pct / 100.0;
            let triggered = actual < threshold_value;
            Verdict {
                status: if triggered {
                    AlertStatus::Triggered
                } else {
                    AlertStatus::Ok
                },
                actual_value: actual,
                threshold_value,
                avg_value: avg,
                triggered_at: triggered.then_some(now),
            }
        }
    }
}

/// Step 4: compare a verdict with the valid alert for the same plant-day-metric.
pub fn diff_against_current(
    reading: &Reading,
    metric: MetricType,
    verdict: Verdict,
    current: Option<&AlertRecord>,
) -> AlertAction {
    // ---
    let unchanged = current.is_some_and(|alert| {
        alert.valid
            && alert.reading_id == reading.id
            && alert.metric_type == metric
            && alert.status == verdict.status
            && alert.actual_value == verdict.actual_value
    });
    if unchanged {
        return AlertAction::Unchanged;
    }

    AlertAction::Replace(NewAlert {
        plant_id: reading.plant_id,
        reading_id: reading.id,
        read_date: reading.read_date,
        metric_type: metric,
        threshold_value: verdict.threshold_value,
        actual_value: verdict.actual_value,
        status: verdict.status,
        triggered_at: verdict.triggered_at,
        avg_value: verdict.avg_value,
    })
}

/// Evaluate one candidate reading under its plant's policy and write the
/// result if it differs from the valid alert. Returns `true` when written.
pub async fn evaluate_plant(
    store: &dyn Store,
    reading: &Reading,
    config: &AlarmConfig,
    ctx: &EvaluationContext,
) -> Result<bool> {
    // ---
    let metric = config.metric_type;
    let actual = reading.metrics.value(metric).ok_or_else(|| {
        PipelineError::MalformedInput(format!(
            "reading {} has no {} value",
            reading.id, metric
        ))
    })?;

    let (from, to) = window_bounds(reading.read_date);
    let history = store
        .valid_readings_between(reading.plant_id, from, to)
        .await?;
    let baseline = compute_baseline(&history, metric, reading.read_date);
    let verdict = classify(actual, baseline, config.threshold_pct, ctx.now);

    debug!(
        plant_id = reading.plant_id,
        metric = %metric,
        baseline = ?baseline,
        status = %verdict.status,
        "Classified reading"
    );

    let current = store
        .current_alert(reading.plant_id, reading.read_date, metric)
        .await?;

    match diff_against_current(reading, metric, verdict, current.as_ref()) {
        AlertAction::Unchanged => Ok(false),
        AlertAction::Replace(alert) => {
            let stored = store.replace_alert(&alert).await?;
            info!(
                plant_id = stored.plant_id,
                alert_id = stored.id,
                status = %stored.status,
                "Recorded alert verdict"
            );
            Ok(true)
        }
    }
}

/// Run one full engine pass.
///
/// Errors only when the candidate set or policies cannot be loaded; per-plant
/// failures are collected in the summary.
pub async fn run_alert_engine(
    store: &dyn Store,
    ctx: &EvaluationContext,
) -> Result<AlertRunSummary> {
    // ---
    let candidates = select_candidates(store.fresh_readings(ctx.today).await?, ctx.today);
    let configs: HashMap<PlantId, AlarmConfig> = store
        .alarm_configs()
        .await?
        .into_iter()
        .map(|c| (c.plant_id, c))
        .collect();

    let mut summary = AlertRunSummary {
        candidates: candidates.len(),
        ..Default::default()
    };

    for reading in &candidates {
        let Some(config) = configs.get(&reading.plant_id) else {
            summary.without_config += 1;
            continue;
        };

        match evaluate_plant(store, reading, config, ctx).await {
            Ok(true) => summary.inserted += 1,
            Ok(false) => summary.unchanged += 1,
            Err(e) => {
                warn!(plant_id = reading.plant_id, error = %e, "Alert evaluation failed");
                summary
                    .failures
                    .push(format!("plant {}: {}", reading.plant_id, e));
            }
        }
    }

    info!(
        candidates = summary.candidates,
        inserted = summary.inserted,
        unchanged = summary.unchanged,
        failed = summary.failures.len(),
        "Alert engine pass complete"
    );
    Ok(summary)
}
