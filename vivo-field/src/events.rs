//! Sync event bus
//!
//! The coordinator, scheduler and health probe publish what they do here so
//! a UI (or the CLI's `run` mode) can show sync progress.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::coordinator::SyncReport;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    PassStarted {
        pending: usize,
        timestamp: DateTime<Utc>,
    },
    PassFinished {
        report: SyncReport,
        timestamp: DateTime<Utc>,
    },
    PassFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Mutations the server resolved against the device
    ConflictsResolved {
        mutation_ids: Vec<Uuid>,
    },
    ConnectivityChanged {
        online: bool,
    },
    SnapshotRefreshed {
        experiment_id: i64,
        synced_at: DateTime<Utc>,
    },
    SnapshotFailed {
        experiment_id: i64,
        error: String,
    },
}

/// Broadcast channel for [`SyncEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for sync event");
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit_lossy(SyncEvent::ConnectivityChanged { online: true });

        match rx.recv().await.unwrap() {
            SyncEvent::ConnectivityChanged { online } => assert!(online),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        bus.emit_lossy(SyncEvent::ConnectivityChanged { online: false });
        assert_eq!(bus.capacity(), 256);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(SyncEvent::SnapshotFailed {
            experiment_id: 3,
            error: "timeout".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "SnapshotFailed");
        assert_eq!(json["experiment_id"], 3);
    }
}
