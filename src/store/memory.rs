//! In-process [`Store`] with the same supersession semantics as `PgStore`.
//!
//! One mutex guards all tables, so every trait call is atomic. The write
//! counter and availability switch let tests assert "nothing was written"
//! and exercise storage outages.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;

use super::Store;
use crate::error::{PipelineError, Result};
use crate::models::{
    AlarmConfig, AlertFilter, AlertRecord, MetricType, NewAlert, NewReading, PlantId, Reading,
};

// ---

#[derive(Debug, Default)]
struct Tables {
    readings: Vec<Reading>,
    alarms: HashMap<PlantId, AlarmConfig>,
    alerts: Vec<AlertRecord>,
    next_reading_id: i64,
    next_alert_id: i64,
    writes: u64,
    unavailable: bool,
}

impl Tables {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(PipelineError::StorageUnavailable(
                "memory store switched offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutating calls so far.
    pub async fn write_count(&self) -> u64 {
        self.tables.lock().await.writes
    }

    /// Make every subsequent call fail with `StorageUnavailable` (or recover).
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.lock().await.unavailable = unavailable;
    }

    /// Insert an alert row verbatim, bypassing supersession. Test fixtures use
    /// this to seed history with arbitrary read dates.
    pub async fn seed_alert(&self, alert: AlertRecord) {
        let mut t = self.tables.lock().await;
        t.next_alert_id = t.next_alert_id.max(alert.id);
        t.alerts.push(alert);
    }

    /// Every alert row, including invalidated ones.
    pub async fn all_alerts(&self) -> Vec<AlertRecord> {
        self.tables.lock().await.alerts.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // ---
    async fn supersede_reading(&self, reading: &NewReading) -> Result<Reading> {
        // ---
        let mut t = self.tables.lock().await;
        t.check_available()?;

        for existing in t.readings.iter_mut().filter(|r| {
            r.valid && r.plant_id == reading.plant_id && r.read_date == reading.read_date
        }) {
            existing.valid = false;
        }

        t.next_reading_id += 1;
        let stored = Reading {
            id: t.next_reading_id,
            plant_id: reading.plant_id,
            metrics: reading.metrics.clone(),
            read_date: reading.read_date,
            load_date: reading.load_date,
            valid: true,
        };
        t.readings.push(stored.clone());
        t.writes += 1;
        Ok(stored)
    }

    async fn reading_history(
        &self,
        plant_id: PlantId,
        read_date: NaiveDate,
    ) -> Result<Vec<Reading>> {
        // ---
        let t = self.tables.lock().await;
        t.check_available()?;
        Ok(t.readings
            .iter()
            .filter(|r| r.plant_id == plant_id && r.read_date == read_date)
            .cloned()
            .collect())
    }

    async fn fresh_readings(&self, load_date: NaiveDate) -> Result<Vec<Reading>> {
        // ---
        let t = self.tables.lock().await;
        t.check_available()?;
        Ok(t.readings
            .iter()
            .filter(|r| r.valid && r.load_date == load_date)
            .cloned()
            .collect())
    }

    async fn valid_readings_between(
        &self,
        plant_id: PlantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reading>> {
        // ---
        let t = self.tables.lock().await;
        t.check_available()?;
        let mut rows: Vec<Reading> = t
            .readings
            .iter()
            .filter(|r| {
                r.valid && r.plant_id == plant_id && r.read_date >= from && r.read_date <= to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.read_date);
        Ok(rows)
    }

    async fn alarm_config(&self, plant_id: PlantId) -> Result<Option<AlarmConfig>> {
        let t = self.tables.lock().await;
        t.check_available()?;
        Ok(t.alarms.get(&plant_id).cloned())
    }

    async fn alarm_configs(&self) -> Result<Vec<AlarmConfig>> {
        let t = self.tables.lock().await;
        t.check_available()?;
        let mut configs: Vec<AlarmConfig> = t.alarms.values().cloned().collect();
        configs.sort_by_key(|c| c.plant_id);
        Ok(configs)
    }

    async fn upsert_alarm_config(&self, config: &AlarmConfig) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.check_available()?;
        t.alarms.insert(config.plant_id, config.clone());
        t.writes += 1;
        Ok(())
    }

    async fn current_alert(
        &self,
        plant_id: PlantId,
        read_date: NaiveDate,
        metric: MetricType,
    ) -> Result<Option<AlertRecord>> {
        // ---
        let t = self.tables.lock().await;
        t.check_available()?;
        Ok(t.alerts
            .iter()
            .find(|a| {
                a.valid
                    && a.plant_id == plant_id
                    && a.read_date == read_date
                    && a.metric_type == metric
            })
            .cloned())
    }

    async fn replace_alert(&self, alert: &NewAlert) -> Result<AlertRecord> {
        // ---
        let mut t = self.tables.lock().await;
        t.check_available()?;

        for existing in t.alerts.iter_mut().filter(|a| {
            a.valid
                && a.plant_id == alert.plant_id
                && a.read_date == alert.read_date
                && a.metric_type == alert.metric_type
        }) {
            existing.valid = false;
        }

        t.next_alert_id += 1;
        let stored = AlertRecord {
            id: t.next_alert_id,
            plant_id: alert.plant_id,
            reading_id: alert.reading_id,
            read_date: alert.read_date,
            metric_type: alert.metric_type,
            threshold_value: alert.threshold_value,
            actual_value: alert.actual_value,
            status: alert.status,
            triggered_at: alert.triggered_at,
            avg_value: alert.avg_value,
            valid: true,
            unread: true,
            created_at: Utc::now(),
        };
        t.alerts.push(stored.clone());
        t.writes += 1;
        Ok(stored)
    }

    async fn purge_alerts_before(&self, cutoff: NaiveDate) -> Result<u64> {
        // ---
        let mut t = self.tables.lock().await;
        t.check_available()?;
        let before = t.alerts.len();
        t.alerts.retain(|a| a.read_date >= cutoff);
        let deleted = (before - t.alerts.len()) as u64;
        if deleted > 0 {
            t.writes += 1;
        }
        Ok(deleted)
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertRecord>> {
        // ---
        let t = self.tables.lock().await;
        t.check_available()?;
        let mut alerts: Vec<AlertRecord> = t
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(alerts)
    }

    async fn mark_alert_read(&self, alert_id: i64) -> Result<bool> {
        // ---
        let mut guard = self.tables.lock().await;
        let t = &mut *guard;
        t.check_available()?;
        match t.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.unread = false;
                t.writes += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
