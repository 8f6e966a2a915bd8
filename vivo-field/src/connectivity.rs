//! Connectivity provider
//!
//! The coordinator and scheduler never probe the network themselves; they
//! ask an injected [`Connectivity`] whether the device is online and
//! subscribe to its changes. [`ConnectivityState`] is the settable provider,
//! driven either by [`HealthProbe`] or directly by tests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{EventBus, SyncEvent};
use crate::transport::SyncTransport;

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Settable online flag
pub struct ConnectivityState {
    tx: watch::Sender<bool>,
}

impl ConnectivityState {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Update the flag; returns true when it changed
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }
}

impl Connectivity for ConnectivityState {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Polls the server health endpoint and feeds the result into a
/// [`ConnectivityState`]
pub struct HealthProbe {
    state: Arc<ConnectivityState>,
    transport: Arc<dyn SyncTransport>,
    events: EventBus,
    interval: Duration,
}

impl HealthProbe {
    pub fn new(
        state: Arc<ConnectivityState>,
        transport: Arc<dyn SyncTransport>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            transport,
            events,
            interval,
        }
    }

    /// Probe once and update the state
    pub async fn probe(&self) -> bool {
        let online = match self.transport.health().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        };

        if self.state.set_online(online) {
            info!(online, "Connectivity changed");
            self.events.emit_lossy(SyncEvent::ConnectivityChanged { online });
        }
        online
    }

    /// Probe every `interval` until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Health probe stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.probe().await;
                }
            }
        }
    }
}
