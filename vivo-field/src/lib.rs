//! vivo-field - offline-first client for field devices
//!
//! Observations, exits and samples recorded on the device are applied to a
//! local cache at once and queued for the server. The coordinator pushes the
//! queue when connectivity allows and refreshes the cache from the server's
//! snapshot afterwards.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod transport;

use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use vivo_common::wire::{Mutation, MutationOutcome};

pub use cache::{LocalCache, SyncMeta};
pub use connectivity::{Connectivity, ConnectivityState};
pub use coordinator::{SyncCoordinator, SyncReport};
pub use error::{Result, SyncError};
pub use events::{EventBus, SyncEvent};
pub use queue::{MutationQueue, QueuedMutation, ResolvedConflict};
pub use scheduler::SyncScheduler;
pub use transport::{HttpTransport, SyncTransport};

/// What happened to a submitted mutation
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Sent straight to the server; carries its verdict
    Sent(MutationOutcome),
    /// Applied locally and queued for the next sync
    Queued(Uuid),
}

/// Sync state shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending: i64,
    /// Pending mutations that have failed at least once
    pub failed: i64,
    pub conflicts_logged: usize,
    pub experiments: Vec<SyncMeta>,
}

/// Entry point for the device: local reads, writes and sync
#[derive(Clone)]
pub struct FieldClient {
    cache: LocalCache,
    queue: MutationQueue,
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn Connectivity>,
    transport: Arc<dyn SyncTransport>,
    events: EventBus,
}

impl FieldClient {
    pub fn new(pool: SqlitePool, transport: Arc<dyn SyncTransport>, connectivity: Arc<dyn Connectivity>) -> Self {
        let cache = LocalCache::new(pool.clone());
        let queue = MutationQueue::new(pool);
        let events = EventBus::default();
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            cache.clone(),
            Arc::clone(&transport),
            Arc::clone(&connectivity),
            events.clone(),
        ));

        Self {
            cache,
            queue,
            coordinator,
            connectivity,
            transport,
            events,
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Record a mutation
    ///
    /// While online the mutation is pushed directly; any transport failure,
    /// or being offline, puts it in the queue with its local effect applied.
    /// Validation errors are returned before anything is stored or sent.
    pub async fn submit(&self, mutation: Mutation) -> Result<SubmitOutcome> {
        mutation.validate()?;
        let experiment_id = self.experiment_for(&mutation).await?;
        let item = QueuedMutation::new(&mutation, experiment_id)?;

        if self.connectivity.is_online() {
            match self.transport.push(std::slice::from_ref(&item.envelope())).await {
                Ok(outcomes) => {
                    if let Some(outcome) = outcomes.into_iter().find(|o| o.id == item.id) {
                        if outcome.is_conflict() {
                            self.queue
                                .resolve_conflicts(&[(item.clone(), outcome.error.clone())])
                                .await?;
                        }
                        if outcome.success || outcome.is_conflict() {
                            if let Err(e) = self.coordinator.refresh_experiment(experiment_id).await {
                                warn!(experiment_id, error = %e, "Refresh after direct submit failed");
                            }
                        }
                        return Ok(SubmitOutcome::Sent(outcome));
                    }
                    warn!(mutation_id = %item.id, "Server returned no result, queueing");
                }
                Err(e) => warn!(mutation_id = %item.id, error = %e, "Direct submit failed, queueing"),
            }
        }

        self.queue.record_offline_write(&item).await?;
        Ok(SubmitOutcome::Queued(item.id))
    }

    /// Experiment a mutation belongs to, looked up from the cached subjects
    async fn experiment_for(&self, mutation: &Mutation) -> Result<i64> {
        let mut experiment_id = None;
        for subject_id in mutation.subject_ids() {
            let subject = self.cache.subject(subject_id).await?.ok_or_else(|| {
                vivo_common::Error::NotFound(format!(
                    "subject {} is not cached; pull its experiment first",
                    subject_id
                ))
            })?;
            match experiment_id {
                None => experiment_id = Some(subject.experiment_id),
                Some(id) if id != subject.experiment_id => {
                    return Err(vivo_common::Error::InvalidInput(
                        "mutation spans subjects of different experiments".to_string(),
                    )
                    .into());
                }
                Some(_) => {}
            }
        }
        experiment_id.ok_or_else(|| vivo_common::Error::InvalidInput("mutation names no subject".to_string()).into())
    }

    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.coordinator.sync_now().await
    }

    /// Pull an experiment without pushing anything
    pub async fn refresh_experiment(&self, experiment_id: i64) -> Result<()> {
        self.coordinator.refresh_experiment(experiment_id).await
    }

    /// Drop a queued mutation the user no longer wants sent
    pub async fn discard(&self, id: Uuid) -> Result<bool> {
        Ok(self.queue.discard(id).await?)
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            online: self.connectivity.is_online(),
            syncing: self.coordinator.is_syncing(),
            pending: self.queue.len().await?,
            failed: self.queue.failed_count().await?,
            conflicts_logged: self.queue.conflicts().await?.len(),
            experiments: self.cache.all_sync_meta().await?,
        })
    }

    /// Scheduler driving this client's coordinator
    pub fn scheduler(&self, interval: Duration, max_backoff: Duration) -> SyncScheduler {
        info!(interval_secs = interval.as_secs(), max_backoff_secs = max_backoff.as_secs(), "Scheduler configured");
        SyncScheduler::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.connectivity),
            self.queue.clone(),
            interval,
            max_backoff,
        )
    }
}
