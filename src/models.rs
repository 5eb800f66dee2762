//! Data models for plant readings, alarm policies and alert records.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ---

/// Plant identifier as issued by the plant registry.
pub type PlantId = i64;

/// Sentinel stored in `threshold_value` / `avg_value` when no baseline exists.
pub const BASELINE_UNAVAILABLE: f64 = -1.0;

/// Metric an alarm policy watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    // ---
    /// Daily energy yield (kWh).
    Yield,
    /// Peak AC power (kW).
    Power,
    /// Specific energy (kWh/kWp).
    SpecificEnergy,
}

impl MetricType {
    // ---
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Yield => "yield",
            MetricType::Power => "power",
            MetricType::SpecificEnergy => "specific_energy",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yield" => Ok(MetricType::Yield),
            "power" => Ok(MetricType::Power),
            "specific_energy" => Ok(MetricType::SpecificEnergy),
            other => Err(PipelineError::Validation(format!(
                "unsupported metric type '{other}' (expected yield, power or specific_energy)"
            ))),
        }
    }
}

/// Numeric production metrics of one plant-day. Absent cells stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantMetrics {
    // ---
    pub total_string_capacity_kwp: Option<f64>,
    pub yield_kwh: Option<f64>,
    pub total_yield_kwh: Option<f64>,
    pub specific_energy_kwh_per_kwp: Option<f64>,
    pub peak_ac_power_kw: Option<f64>,
    pub grid_connection_duration_h: Option<f64>,
}

impl PlantMetrics {
    // ---
    /// `true` when no metric carries a value.
    pub fn is_empty(&self) -> bool {
        [
            self.total_string_capacity_kwp,
            self.yield_kwh,
            self.total_yield_kwh,
            self.specific_energy_kwh_per_kwp,
            self.peak_ac_power_kw,
            self.grid_connection_duration_h,
        ]
        .iter()
        .all(Option::is_none)
    }

    /// Value of the metric an alarm policy refers to.
    pub fn value(&self, metric: MetricType) -> Option<f64> {
        match metric {
            MetricType::Yield => self.yield_kwh,
            MetricType::Power => self.peak_ac_power_kw,
            MetricType::SpecificEnergy => self.specific_energy_kwh_per_kwp,
        }
    }
}

/// Output of the format normalizer: one plant-day record in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    // ---
    pub plant_id: PlantId,
    #[serde(flatten)]
    pub metrics: PlantMetrics,
    /// Missing when the source omitted it; the ingestor substitutes the load date.
    pub read_date: Option<NaiveDate>,
}

/// A reading about to be written by the ingestor.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    // ---
    pub plant_id: PlantId,
    pub metrics: PlantMetrics,
    pub read_date: NaiveDate,
    pub load_date: NaiveDate,
}

/// A stored plant-day reading. Superseded versions keep `valid = false`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    // ---
    pub id: i64,
    pub plant_id: PlantId,
    #[serde(flatten)]
    pub metrics: PlantMetrics,
    pub read_date: NaiveDate,
    pub load_date: NaiveDate,
    pub valid: bool,
}

/// Per-plant alerting policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    // ---
    pub plant_id: PlantId,
    pub metric_type: MetricType,
    /// Percentage of the rolling baseline below which the plant alerts.
    #[serde(rename = "threshold_value")]
    pub threshold_pct: f64,
}

impl AlarmConfig {
    /// Build a policy from loosely typed input, rejecting bad values before
    /// anything reaches storage.
    pub fn parse(
        plant_id: PlantId,
        metric_type: &str,
        threshold: &serde_json::Value,
    ) -> Result<Self, PipelineError> {
        // ---
        let metric_type = metric_type.trim().parse::<MetricType>()?;

        let threshold_pct = match threshold {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            PipelineError::Validation(format!("threshold must be numeric, got {threshold}"))
        })?;

        if !threshold_pct.is_finite() || threshold_pct < 0.0 {
            return Err(PipelineError::Validation(format!(
                "threshold must be a non-negative percentage, got {threshold_pct}"
            )));
        }

        Ok(AlarmConfig {
            plant_id,
            metric_type,
            threshold_pct,
        })
    }
}

/// Verdict of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    // ---
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "triggered")]
    Triggered,
    #[serde(rename = "n/a")]
    NotAvailable,
}

impl AlertStatus {
    // ---
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Ok => "ok",
            AlertStatus::Triggered => "triggered",
            AlertStatus::NotAvailable => "n/a",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(AlertStatus::Ok),
            "triggered" => Ok(AlertStatus::Triggered),
            "n/a" => Ok(AlertStatus::NotAvailable),
            other => Err(PipelineError::StorageUnavailable(format!(
                "unknown alert status '{other}' in store"
            ))),
        }
    }
}

/// An alert verdict about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    // ---
    pub plant_id: PlantId,
    pub reading_id: i64,
    pub read_date: NaiveDate,
    pub metric_type: MetricType,
    pub threshold_value: f64,
    pub actual_value: f64,
    pub status: AlertStatus,
    pub triggered_at: Option<DateTime<Utc>>,
    pub avg_value: f64,
}

/// A stored alert verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    // ---
    pub id: i64,
    pub plant_id: PlantId,
    pub reading_id: i64,
    pub read_date: NaiveDate,
    pub metric_type: MetricType,
    pub threshold_value: f64,
    pub actual_value: f64,
    pub status: AlertStatus,
    pub triggered_at: Option<DateTime<Utc>>,
    pub avg_value: f64,
    pub valid: bool,
    pub unread: bool,
    pub created_at: DateTime<Utc>,
}

/// Filter for alert listings. Only valid records are ever listed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub plant_id: Option<PlantId>,
    pub unread: Option<bool>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &AlertRecord) -> bool {
        alert.valid
            && self.plant_id.map_or(true, |id| alert.plant_id == id)
            && self.unread.map_or(true, |u| alert.unread == u)
    }
}
