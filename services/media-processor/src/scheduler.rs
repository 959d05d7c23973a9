use crate::sweeper::ReconciliationSweeper;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// Runs the reconciliation sweep on a fixed interval.
///
/// Passes run inline on the scheduler loop, so two passes never overlap; a
/// pass that overruns the interval delays the next tick instead.
pub struct SweepScheduler {
    sweeper: Arc<ReconciliationSweeper>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(sweeper: Arc<ReconciliationSweeper>, interval: Duration) -> Self {
        Self { sweeper, interval }
    }

    pub async fn run(&self) {
        let mut sweep_interval = interval(self.interval);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Sweep scheduler started, running every {} seconds",
            self.interval.as_secs()
        );

        loop {
            sweep_interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        debug!("Sweep scheduler tick");
        let migrated = self.sweeper.sweep_once().await;
        if migrated > 0 {
            info!("Migrated {} local originals to the durable store", migrated);
        }
    }
}
