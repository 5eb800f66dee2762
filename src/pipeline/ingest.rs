//! Versioned ingestor: writes a canonical record as the valid reading for its
//! plant-day, superseding (never deleting) earlier versions.

use chrono::NaiveDate;
use tracing::info;

use crate::error::Result;
use crate::models::{CanonicalRecord, NewReading, Reading};
use crate::store::Store;

// ---

/// Build the row to write. A record without a read date is filed under the
/// load date, so the latest snapshot wins for that day.
pub fn to_new_reading(record: &CanonicalRecord, load_date: NaiveDate) -> NewReading {
    // ---
    NewReading {
        plant_id: record.plant_id,
        metrics: record.metrics.clone(),
        read_date: record.read_date.unwrap_or(load_date),
        load_date,
    }
}

/// Invalidate-then-insert inside one store transaction.
///
/// Storage failures propagate as `StorageUnavailable`; no retry happens here.
pub async fn ingest(
    store: &dyn Store,
    record: &CanonicalRecord,
    load_date: NaiveDate,
) -> Result<Reading> {
    // ---
    let new_reading = to_new_reading(record, load_date);
    let stored = store.supersede_reading(&new_reading).await?;

    info!(
        plant_id = stored.plant_id,
        reading_id = stored.id,
        read_date = %stored.read_date,
        "Ingested plant reading"
    );
    Ok(stored)
}
