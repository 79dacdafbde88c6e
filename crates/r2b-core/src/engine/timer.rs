//! Periodic flush trigger.
//!
//! Forces a flush on a fixed interval so buffered records reach the sink
//! even when no new records arrive to run the policy check.

use super::coordinator::{FlushCoordinator, FlushOutcome, FlushTrigger};
use super::shutdown_requested;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Background task calling [`FlushCoordinator::force_flush`] every interval.
pub struct FlushTimer {
    coordinator: Arc<FlushCoordinator>,
    interval: Duration,
}

impl FlushTimer {
    pub fn new(coordinator: Arc<FlushCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Spawn the timer. It stops once `shutdown` flips to `true`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_s = self.interval.as_secs(), "Flush timer started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown_requested(&mut shutdown) => {
                        debug!("Flush timer received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    async fn tick(&self) {
        let pending = self.coordinator.buffer().pending();
        debug!(pending, "Timer tick");

        match self.coordinator.force_flush_with(FlushTrigger::Timer).await {
            FlushOutcome::Flushed(report) => {
                debug!(
                    generation = report.generation,
                    records = report.records,
                    "Timer flush finished"
                );
            }
            FlushOutcome::InProgress => debug!("Timer flush skipped, drain in progress"),
            FlushOutcome::Empty | FlushOutcome::NotDue => {}
        }
    }
}
