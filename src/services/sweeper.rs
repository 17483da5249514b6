use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::services::job_store::JobStore;

/// Start the background loop that evicts abandoned jobs every `period`.
/// The first sweep runs one full period after start.
pub fn spawn_sweeper(store: Arc<JobStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = period.as_secs(),
            pending_ttl_secs = store.policy().pending_ttl.num_seconds(),
            "Job sweeper started"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let report = store.sweep();
            if report.total() > 0 {
                tracing::info!(
                    abandoned = report.abandoned,
                    expired = report.expired,
                    remaining = store.len(),
                    "Swept idle jobs"
                );
            } else {
                tracing::trace!("Sweep found nothing to evict");
            }
        }
    })
}
