//! Database schema management for `pv-sentinel`.
//!
//! Ensures required tables and indexes exist before the pipeline runs.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `plant_data` (versioned readings), `alarm_plant` (per-plant
/// policy) and `alert_log` (alert verdicts). The partial unique indexes hold
/// the "one valid row per logical key" invariants even if a writer misbehaves.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plant_data (
            id                          BIGSERIAL PRIMARY KEY,
            plant_id                    BIGINT           NOT NULL,
            total_string_capacity_kwp   DOUBLE PRECISION,
            yield_kwh                   DOUBLE PRECISION,
            total_yield_kwh             DOUBLE PRECISION,
            specific_energy_kwh_per_kwp DOUBLE PRECISION,
            peak_ac_power_kw            DOUBLE PRECISION,
            grid_connection_duration_h  DOUBLE PRECISION,
            read_date                   DATE             NOT NULL,
            load_date                   DATE             NOT NULL,
            loaded_at                   TIMESTAMPTZ      NOT NULL DEFAULT now(),
            is_valid                    BOOLEAN          NOT NULL DEFAULT TRUE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_plant_data_valid
            ON plant_data (plant_id, read_date)
            WHERE is_valid;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Candidate selection filters on load_date
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_plant_data_load_date
            ON plant_data (load_date)
            WHERE is_valid;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alarm_plant (
            plant_id        BIGINT           PRIMARY KEY,
            metric_type     TEXT             NOT NULL
                CHECK (metric_type IN ('yield', 'power', 'specific_energy')),
            threshold_value DOUBLE PRECISION NOT NULL,
            updated_at      TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_log (
            id              BIGSERIAL PRIMARY KEY,
            plant_id        BIGINT           NOT NULL,
            plant_data_id   BIGINT           NOT NULL REFERENCES plant_data (id),
            read_date       DATE             NOT NULL,
            metric_type     TEXT             NOT NULL,
            threshold_value DOUBLE PRECISION NOT NULL,
            actual_value    DOUBLE PRECISION NOT NULL,
            status          TEXT             NOT NULL
                CHECK (status IN ('ok', 'triggered', 'n/a')),
            triggered_at    TIMESTAMPTZ,
            avg_value       DOUBLE PRECISION NOT NULL,
            is_valid        BOOLEAN          NOT NULL DEFAULT TRUE,
            unread          BOOLEAN          NOT NULL DEFAULT TRUE,
            created_at      TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_alert_log_valid
            ON alert_log (plant_id, read_date, metric_type)
            WHERE is_valid;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alert_log_read_date
            ON alert_log (read_date);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
