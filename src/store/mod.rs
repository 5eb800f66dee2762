//! Storage gateway for the pipeline.
//!
//! The relational store is a collaborator; the pipeline only sees the
//! [`Store`] trait. `PgStore` is the production implementation and
//! `MemoryStore` mirrors its semantics in-process.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{
    AlarmConfig, AlertFilter, AlertRecord, MetricType, NewAlert, NewReading, PlantId, Reading,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Typed, transactional access to readings, alarm policies and alerts.
#[async_trait]
pub trait Store: Send + Sync {
    // ---
    /// Atomically mark every valid reading for `(plant_id, read_date)` invalid
    /// and insert `reading` as the new valid one. Either both happen or neither.
    async fn supersede_reading(&self, reading: &NewReading) -> Result<Reading>;

    /// All versions (valid and superseded) for one plant-day, oldest first.
    async fn reading_history(&self, plant_id: PlantId, read_date: NaiveDate)
        -> Result<Vec<Reading>>;

    /// Valid readings loaded on `load_date`, any plant.
    async fn fresh_readings(&self, load_date: NaiveDate) -> Result<Vec<Reading>>;

    /// Valid readings of one plant with `from <= read_date <= to`.
    async fn valid_readings_between(
        &self,
        plant_id: PlantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reading>>;

    async fn alarm_config(&self, plant_id: PlantId) -> Result<Option<AlarmConfig>>;

    async fn alarm_configs(&self) -> Result<Vec<AlarmConfig>>;

    async fn upsert_alarm_config(&self, config: &AlarmConfig) -> Result<()>;

    /// The valid alert for `(plant_id, read_date, metric)`, if any.
    async fn current_alert(
        &self,
        plant_id: PlantId,
        read_date: NaiveDate,
        metric: MetricType,
    ) -> Result<Option<AlertRecord>>;

    /// Atomically invalidate the valid alert for the same
    /// `(plant, read_date, metric)` and insert `alert` as valid and unread.
    async fn replace_alert(&self, alert: &NewAlert) -> Result<AlertRecord>;

    /// Hard-delete alerts whose read date is before `cutoff`. Returns the count.
    async fn purge_alerts_before(&self, cutoff: NaiveDate) -> Result<u64>;

    /// Valid alerts matching `filter`, newest first.
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertRecord>>;

    /// Flip `unread` to false. Returns `false` when no such alert exists.
    async fn mark_alert_read(&self, alert_id: i64) -> Result<bool>;
}
