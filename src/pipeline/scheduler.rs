//! Fixed-interval trigger for the alerting graph.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::alerts::EvaluationContext;
use super::orchestrator::Orchestrator;

// ---

/// Default cadence of the alerting graph.
pub const DEFAULT_ALERT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Run the alerting graph every `every`, starting immediately.
///
/// A slow run delays the next tick instead of queueing a burst. Failures are
/// reported through the run registry; the loop keeps going.
pub fn spawn_alert_schedule(orchestrator: Orchestrator, every: Duration) -> JoinHandle<()> {
    // ---
    info!(interval_secs = every.as_secs(), "Starting alert schedule");

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = orchestrator
                .run_alerts(EvaluationContext::at(Utc::now()))
                .await;
            debug!(run_id = %report.run_id, state = ?report.state, "Scheduled alert run finished");
        }
    })
}
