//! PostgreSQL implementation of [`Store`] on top of a sqlx pool.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::Store;
use crate::error::{PipelineError, Result};
use crate::models::{
    AlarmConfig, AlertFilter, AlertRecord, MetricType, NewAlert, NewReading, PlantId,
    PlantMetrics, Reading,
};

// ---

/// `Store` backed by the `plant_data`, `alarm_plant` and `alert_log` tables.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    // ---
    id: i64,
    plant_id: i64,
    total_string_capacity_kwp: Option<f64>,
    yield_kwh: Option<f64>,
    total_yield_kwh: Option<f64>,
    specific_energy_kwh_per_kwp: Option<f64>,
    peak_ac_power_kw: Option<f64>,
    grid_connection_duration_h: Option<f64>,
    read_date: NaiveDate,
    load_date: NaiveDate,
    is_valid: bool,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            id: row.id,
            plant_id: row.plant_id,
            metrics: PlantMetrics {
                total_string_capacity_kwp: row.total_string_capacity_kwp,
                yield_kwh: row.yield_kwh,
                total_yield_kwh: row.total_yield_kwh,
                specific_energy_kwh_per_kwp: row.specific_energy_kwh_per_kwp,
                peak_ac_power_kw: row.peak_ac_power_kw,
                grid_connection_duration_h: row.grid_connection_duration_h,
            },
            read_date: row.read_date,
            load_date: row.load_date,
            valid: row.is_valid,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlarmRow {
    plant_id: i64,
    metric_type: String,
    threshold_value: f64,
}

impl TryFrom<AlarmRow> for AlarmConfig {
    type Error = PipelineError;

    fn try_from(row: AlarmRow) -> Result<Self> {
        Ok(AlarmConfig {
            plant_id: row.plant_id,
            metric_type: row.metric_type.parse()?,
            threshold_pct: row.threshold_value,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    // ---
    id: i64,
    plant_id: i64,
    plant_data_id: i64,
    read_date: NaiveDate,
    metric_type: String,
    threshold_value: f64,
    actual_value: f64,
    status: String,
    triggered_at: Option<DateTime<Utc>>,
    avg_value: f64,
    is_valid: bool,
    unread: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for AlertRecord {
    type Error = PipelineError;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(AlertRecord {
            id: row.id,
            plant_id: row.plant_id,
            reading_id: row.plant_data_id,
            read_date: row.read_date,
            metric_type: row.metric_type.parse()?,
            threshold_value: row.threshold_value,
            actual_value: row.actual_value,
            status: row.status.parse()?,
            triggered_at: row.triggered_at,
            avg_value: row.avg_value,
            valid: row.is_valid,
            unread: row.unread,
            created_at: row.created_at,
        })
    }
}

fn alerts_from_rows(rows: Vec<AlertRow>) -> Result<Vec<AlertRecord>> {
    rows.into_iter().map(AlertRecord::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    // ---
    async fn supersede_reading(&self, reading: &NewReading) -> Result<Reading> {
        // ---
        let mut tx = self.pool.begin().await?;

        // Serialize writers of the same plant-day for the rest of the transaction
        sqlx::query(
            r#"
            SELECT pg_advisory_xact_lock(
                hashtext('plant_data/' || $1::bigint::text || '/' || $2::date::text)
            )
            "#,
        )
        .bind(reading.plant_id)
        .bind(reading.read_date)
        .execute(&mut *tx)
        .await?;

        let invalidated = sqlx::query(
            r#"
            UPDATE plant_data
               SET is_valid = FALSE
             WHERE plant_id = $1
               AND read_date = $2
               AND is_valid = TRUE
            "#,
        )
        .bind(reading.plant_id)
        .bind(reading.read_date)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let m = &reading.metrics;
        let row: ReadingRow = sqlx::query_as(
            r#"
            INSERT INTO plant_data (
                plant_id, total_string_capacity_kwp, yield_kwh, total_yield_kwh,
                specific_energy_kwh_per_kwp, peak_ac_power_kw, grid_connection_duration_h,
                read_date, load_date, is_valid
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
            RETURNING id, plant_id, total_string_capacity_kwp, yield_kwh, total_yield_kwh,
                      specific_energy_kwh_per_kwp, peak_ac_power_kw, grid_connection_duration_h,
                      read_date, load_date, is_valid
            "#,
        )
        .bind(reading.plant_id)
        .bind(m.total_string_capacity_kwp)
        .bind(m.yield_kwh)
        .bind(m.total_yield_kwh)
        .bind(m.specific_energy_kwh_per_kwp)
        .bind(m.peak_ac_power_kw)
        .bind(m.grid_connection_duration_h)
        .bind(reading.read_date)
        .bind(reading.load_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            plant_id = reading.plant_id,
            read_date = %reading.read_date,
            invalidated,
            "Superseded plant reading"
        );
        Ok(row.into())
    }

    async fn reading_history(
        &self,
        plant_id: PlantId,
        read_date: NaiveDate,
    ) -> Result<Vec<Reading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT id, plant_id, total_string_capacity_kwp, yield_kwh, total_yield_kwh,
                   specific_energy_kwh_per_kwp, peak_ac_power_kw, grid_connection_duration_h,
                   read_date, load_date, is_valid
              FROM plant_data
             WHERE plant_id = $1 AND read_date = $2
             ORDER BY id
            "#,
        )
        .bind(plant_id)
        .bind(read_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn fresh_readings(&self, load_date: NaiveDate) -> Result<Vec<Reading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT id, plant_id, total_string_capacity_kwp, yield_kwh, total_yield_kwh,
                   specific_energy_kwh_per_kwp, peak_ac_power_kw, grid_connection_duration_h,
                   read_date, load_date, is_valid
              FROM plant_data
             WHERE load_date = $1 AND is_valid = TRUE
             ORDER BY plant_id, read_date DESC, id DESC
            "#,
        )
        .bind(load_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn valid_readings_between(
        &self,
        plant_id: PlantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT id, plant_id, total_string_capacity_kwp, yield_kwh, total_yield_kwh,
                   specific_energy_kwh_per_kwp, peak_ac_power_kw, grid_connection_duration_h,
                   read_date, load_date, is_valid
              FROM plant_data
             WHERE plant_id = $1
               AND read_date BETWEEN $2 AND $3
               AND is_valid = TRUE
             ORDER BY read_date
            "#,
        )
        .bind(plant_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn alarm_config(&self, plant_id: PlantId) -> Result<Option<AlarmConfig>> {
        // ---
        let row: Option<AlarmRow> = sqlx::query_as(
            "SELECT plant_id, metric_type, threshold_value FROM alarm_plant WHERE plant_id = $1",
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlarmConfig::try_from).transpose()
    }

    async fn alarm_configs(&self) -> Result<Vec<AlarmConfig>> {
        // ---
        let rows: Vec<AlarmRow> = sqlx::query_as(
            "SELECT plant_id, metric_type, threshold_value FROM alarm_plant ORDER BY plant_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlarmConfig::try_from).collect()
    }

    async fn upsert_alarm_config(&self, config: &AlarmConfig) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO alarm_plant (plant_id, metric_type, threshold_value)
            VALUES ($1, $2, $3)
            ON CONFLICT (plant_id) DO UPDATE SET
                metric_type = EXCLUDED.metric_type,
                threshold_value = EXCLUDED.threshold_value,
                updated_at = now()
            "#,
        )
        .bind(config.plant_id)
        .bind(config.metric_type.as_str())
        .bind(config.threshold_pct)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn current_alert(
        &self,
        plant_id: PlantId,
        read_date: NaiveDate,
        metric: MetricType,
    ) -> Result<Option<AlertRecord>> {
        // ---
        let row: Option<AlertRow> = sqlx::query_as(
            r#"
            SELECT id, plant_id, plant_data_id, read_date, metric_type, threshold_value,
                   actual_value, status, triggered_at, avg_value, is_valid, unread, created_at
              FROM alert_log
             WHERE plant_id = $1
               AND read_date = $2
               AND metric_type = $3
               AND is_valid = TRUE
            "#,
        )
        .bind(plant_id)
        .bind(read_date)
        .bind(metric.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlertRecord::try_from).transpose()
    }

    async fn replace_alert(&self, alert: &NewAlert) -> Result<AlertRecord> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            SELECT pg_advisory_xact_lock(
                hashtext(
                    'alert_log/' || $1::bigint::text || '/' || $2::date::text || '/' || $3::text
                )
            )
            "#,
        )
        .bind(alert.plant_id)
        .bind(alert.read_date)
        .bind(alert.metric_type.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE alert_log
               SET is_valid = FALSE
             WHERE plant_id = $1
               AND read_date = $2
               AND metric_type = $3
               AND is_valid = TRUE
            "#,
        )
        .bind(alert.plant_id)
        .bind(alert.read_date)
        .bind(alert.metric_type.as_str())
        .execute(&mut *tx)
        .await?;

        let row: AlertRow = sqlx::query_as(
            r#"
            INSERT INTO alert_log (
                plant_id, plant_data_id, read_date, metric_type, threshold_value,
                actual_value, status, triggered_at, avg_value, is_valid, unread
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, TRUE)
            RETURNING id, plant_id, plant_data_id, read_date, metric_type, threshold_value,
                      actual_value, status, triggered_at, avg_value, is_valid, unread, created_at
            "#,
        )
        .bind(alert.plant_id)
        .bind(alert.reading_id)
        .bind(alert.read_date)
        .bind(alert.metric_type.as_str())
        .bind(alert.threshold_value)
        .bind(alert.actual_value)
        .bind(alert.status.as_str())
        .bind(alert.triggered_at)
        .bind(alert.avg_value)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn purge_alerts_before(&self, cutoff: NaiveDate) -> Result<u64> {
        // ---
        let deleted = sqlx::query("DELETE FROM alert_log WHERE read_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertRecord>> {
        // ---
        let rows: Vec<AlertRow> = sqlx::query_as(
            r#"
            SELECT id, plant_id, plant_data_id, read_date, metric_type, threshold_value,
                   actual_value, status, triggered_at, avg_value, is_valid, unread, created_at
              FROM alert_log
             WHERE is_valid = TRUE
               AND ($1::bigint IS NULL OR plant_id = $1)
               AND ($2::boolean IS NULL OR unread = $2)
             ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(filter.plant_id)
        .bind(filter.unread)
        .fetch_all(&self.pool)
        .await?;

        alerts_from_rows(rows)
    }

    async fn mark_alert_read(&self, alert_id: i64) -> Result<bool> {
        // ---
        let updated = sqlx::query("UPDATE alert_log SET unread = FALSE WHERE id = $1")
            .bind(alert_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(updated > 0)
    }
}
