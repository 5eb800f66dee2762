//! Retention sweeper for the alert table.

use chrono::{Duration, NaiveDate};
use tracing::info;

use crate::error::Result;
use crate::store::Store;

// ---

/// Alerts whose read date is older than this many days are deleted. A fixed
/// policy: changing it changes behavior, so it is not configuration.
pub const ALERT_RETENTION_DAYS: i64 = 365;

/// First read date that survives a sweep on `today`.
pub fn retention_cutoff(today: NaiveDate) -> NaiveDate {
    today - Duration::days(ALERT_RETENTION_DAYS)
}

/// Delete every alert (valid or not, read or not) older than the horizon.
pub async fn sweep_alerts(store: &dyn Store, today: NaiveDate) -> Result<u64> {
    // ---
    let cutoff = retention_cutoff(today);
    let deleted = store.purge_alerts_before(cutoff).await?;
    info!(deleted, cutoff = %cutoff, "Purged expired alert records");
    Ok(deleted)
}
