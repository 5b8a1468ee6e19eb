//! Background housekeeping: revocation sweep and quota-counter cleanup.

use crate::auth::revocation::RevocationStore;
use crate::middleware::CounterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub revocations_purged: usize,
    pub counters_dropped: usize,
}

/// Run one sweep. A failing revocation purge is logged and retried on the
/// next tick.
pub async fn sweep_once(
    revocations: &dyn RevocationStore,
    counters: &dyn CounterStore,
) -> SweepReport {
    let revocations_purged = match revocations.purge_expired().await {
        Ok(purged) => purged,
        Err(e) => {
            warn!(error = %e, "revocation sweep failed");
            0
        }
    };
    let counters_dropped = counters.cleanup().await;

    SweepReport {
        revocations_purged,
        counters_dropped,
    }
}

pub fn spawn_sweeper(
    revocations: Arc<dyn RevocationStore>,
    counters: Arc<dyn CounterStore>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = sweep_once(revocations.as_ref(), counters.as_ref()).await;
            if report.revocations_purged > 0 || report.counters_dropped > 0 {
                info!(
                    revocations = report.revocations_purged,
                    counters = report.counters_dropped,
                    "🧹 maintenance sweep"
                );
            } else {
                debug!("maintenance sweep: nothing to do");
            }
        }
    })
}
