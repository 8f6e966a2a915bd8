//! Sync triggers
//!
//! Runs a sync pass when the device comes back online and on a timer while
//! online with a non-empty queue. The timer doubles after a failed pass up
//! to `max_backoff` and drops back to the base interval after a clean one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::coordinator::SyncCoordinator;
use crate::queue::MutationQueue;

/// Log how a background task ended; returns false if it panicked or was aborted
pub fn report_task_exit(task: &str, result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            warn!(task, error = %e, "Background task panicked");
            false
        }
        Err(e) => {
            warn!(task, error = %e, "Background task did not finish");
            false
        }
    }
}

/// Delay before the next timed pass
pub fn next_delay(current: Duration, base: Duration, max: Duration, success: bool) -> Duration {
    if success {
        base
    } else {
        current.saturating_mul(2).clamp(base, max.max(base))
    }
}

pub struct SyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn Connectivity>,
    /// Subscribed at construction so no transition after `new` is missed
    online_rx: watch::Receiver<bool>,
    queue: MutationQueue,
    interval: Duration,
    max_backoff: Duration,
}

impl SyncScheduler {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        connectivity: Arc<dyn Connectivity>,
        queue: MutationQueue,
        interval: Duration,
        max_backoff: Duration,
    ) -> Self {
        let online_rx = connectivity.subscribe();
        Self {
            coordinator,
            connectivity,
            online_rx,
            queue,
            interval,
            max_backoff,
        }
    }

    /// Run until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut online_rx = self.online_rx.clone();
        let mut watching = true;
        let mut delay = self.interval;

        info!(interval_secs = self.interval.as_secs(), "Sync scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sync scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(delay) => delay = self.tick(delay).await,
                changed = online_rx.changed(), if watching => {
                    match changed {
                        Ok(()) => {
                            if *online_rx.borrow_and_update() {
                                debug!("Back online, syncing");
                                delay = self.pass(self.interval).await;
                            }
                        }
                        // Provider dropped; keep running on the timer alone
                        Err(_) => watching = false,
                    }
                }
            }
        }
    }

    /// Handle one timer expiry and return the delay until the next
    ///
    /// Syncs only while online with queued work; otherwise `delay` is kept.
    pub async fn tick(&self, delay: Duration) -> Duration {
        if !self.connectivity.is_online() {
            return delay;
        }
        match self.queue.is_empty().await {
            Ok(true) => delay,
            Ok(false) => self.pass(delay).await,
            Err(e) => {
                warn!(error = %e, "Could not read queue length");
                delay
            }
        }
    }

    async fn pass(&self, delay: Duration) -> Duration {
        let success = match self.coordinator.sync_now().await {
            Ok(report) if report.skipped => return delay,
            Ok(report) => report.failed == 0,
            Err(e) => {
                warn!(error = %e, "Scheduled sync failed");
                false
            }
        };

        let next = next_delay(delay, self.interval, self.max_backoff, success);
        if next != self.interval {
            debug!(next_secs = next.as_secs(), "Backing off");
        }
        next
    }
}
