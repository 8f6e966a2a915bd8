//! Sync coordinator
//!
//! One sync pass drains the queue, pushes it in client-timestamp order and
//! settles every item by its outcome:
//!
//! - applied: removed from the queue
//! - conflict: logged as resolved and removed; the server's state wins
//! - failure: kept with its attempt count raised, retried on the next pass
//!
//! Afterwards each touched experiment is pulled again so the cache shows
//! the server's view. Pull failures never undo the push.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vivo_common::wire::MutationEnvelope;

use crate::cache::LocalCache;
use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::queue::{MutationQueue, QueuedMutation};
use crate::transport::SyncTransport;

/// Summary of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Mutations sent
    pub total: usize,
    /// Applied, including partially conflicted batches
    pub succeeded: usize,
    /// Kept in the queue for retry
    pub failed: usize,
    /// Resolved in the server's favour
    pub conflicts: usize,
    pub errors: Vec<String>,
    pub conflicted_ids: Vec<Uuid>,
    /// True when another pass was already running
    pub skipped: bool,
}

/// Clears the in-flight flag when a pass ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    queue: MutationQueue,
    cache: LocalCache,
    transport: Arc<dyn SyncTransport>,
    connectivity: Arc<dyn Connectivity>,
    events: EventBus,
    in_flight: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        queue: MutationQueue,
        cache: LocalCache,
        transport: Arc<dyn SyncTransport>,
        connectivity: Arc<dyn Connectivity>,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            cache,
            transport,
            connectivity,
            events,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one sync pass
    ///
    /// A call made while another pass is running returns at once with
    /// `skipped` set. Errors only when the push itself could not be
    /// delivered or the local store failed; the queue is then unchanged
    /// apart from attempt counts.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress, skipping");
            return Ok(SyncReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = InFlight(&self.in_flight);

        let pending = self.queue.drain().await?;
        if pending.is_empty() {
            debug!("Queue empty, nothing to sync");
            return Ok(SyncReport::default());
        }

        if !self.connectivity.is_online() {
            debug!(pending = pending.len(), "Offline, sync deferred");
            return Ok(SyncReport {
                errors: vec!["offline: sync deferred".to_string()],
                ..Default::default()
            });
        }

        self.events.emit_lossy(SyncEvent::PassStarted {
            pending: pending.len(),
            timestamp: vivo_common::time::now(),
        });
        info!(pending = pending.len(), "Sync pass started");

        let envelopes: Vec<MutationEnvelope> = pending.iter().map(QueuedMutation::envelope).collect();
        let outcomes = match self.transport.push(&envelopes).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(error = %err, "Push failed, queue kept");
                let message = err.to_string();
                for item in &pending {
                    self.queue.record_failure(item.id, &message).await?;
                }
                self.events.emit_lossy(SyncEvent::PassFailed {
                    error: message,
                    timestamp: vivo_common::time::now(),
                });
                return Err(err);
            }
        };

        let mut report = SyncReport {
            total: pending.len(),
            ..Default::default()
        };
        let mut confirmed = Vec::new();
        let mut resolved = Vec::new();

        for item in &pending {
            let Some(outcome) = outcomes.iter().find(|o| o.id == item.id) else {
                report.failed += 1;
                let message = format!("{}: no result returned", item.id);
                self.queue.record_failure(item.id, &message).await?;
                report.errors.push(message);
                continue;
            };

            if outcome.success {
                report.succeeded += 1;
                if outcome.is_conflict() {
                    report.conflicts += 1;
                    report.conflicted_ids.push(item.id);
                    resolved.push((item.clone(), outcome.error.clone()));
                } else {
                    confirmed.push(item.id);
                }
            } else if outcome.is_conflict() {
                report.conflicts += 1;
                report.conflicted_ids.push(item.id);
                resolved.push((item.clone(), outcome.error.clone()));
            } else {
                report.failed += 1;
                let message = outcome.error.clone().unwrap_or_else(|| "unknown error".to_string());
                self.queue.record_failure(item.id, &message).await?;
                report.errors.push(format!("{}: {}", item.id, message));
            }
        }

        self.queue.remove(&confirmed).await?;
        self.queue.resolve_conflicts(&resolved).await?;
        for (item, message) in &resolved {
            info!(
                mutation_id = %item.id,
                kind = %item.kind,
                reason = message.as_deref().unwrap_or(""),
                "Conflict resolved in favour of server"
            );
        }
        if !report.conflicted_ids.is_empty() {
            self.events.emit_lossy(SyncEvent::ConflictsResolved {
                mutation_ids: report.conflicted_ids.clone(),
            });
        }

        let experiments: BTreeSet<i64> = pending.iter().map(|item| item.experiment_id).collect();
        for experiment_id in experiments {
            if let Err(err) = self.refresh_experiment(experiment_id).await {
                report.errors.push(format!("pull of experiment {} failed: {}", experiment_id, err));
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            conflicts = report.conflicts,
            "Sync pass finished"
        );
        self.events.emit_lossy(SyncEvent::PassFinished {
            report: report.clone(),
            timestamp: vivo_common::time::now(),
        });

        Ok(report)
    }

    /// Pull one experiment and replace its cached state
    pub async fn refresh_experiment(&self, experiment_id: i64) -> Result<()> {
        let result = async {
            let snapshot = self.transport.pull(experiment_id).await?;
            self.cache.replace_snapshot(&snapshot).await?;
            Ok::<_, crate::error::SyncError>(snapshot.synced_at)
        }
        .await;

        match result {
            Ok(synced_at) => {
                self.events.emit_lossy(SyncEvent::SnapshotRefreshed {
                    experiment_id,
                    synced_at,
                });
                Ok(())
            }
            Err(err) => {
                warn!(experiment_id, error = %err, "Snapshot refresh failed");
                self.events.emit_lossy(SyncEvent::SnapshotFailed {
                    experiment_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
