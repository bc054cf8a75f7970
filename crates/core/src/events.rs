//! In-process notification bus consumed by UI layers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::SyncTable;
use crate::sync::SyncReport;

/// Coarse sync state surfaced as a status indicator (never a blocking
/// dialog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Offline,
    Error,
}

/// Events emitted for the embedding application.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppEvent {
    #[serde(rename_all = "camelCase")]
    RecordUpdated {
        table: SyncTable,
        record_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    RecordRemoved {
        table: SyncTable,
        record_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SyncComplete { report: SyncReport },
    #[serde(rename_all = "camelCase")]
    SyncStatus {
        state: SyncState,
        pending_operations: usize,
        timestamp: DateTime<Utc>,
    },
}

const BUS_CAPACITY: usize = 256;

/// Broadcast bus; emitting with no subscribers is a no-op.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<AppEvent>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscribers() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        bus.emit(AppEvent::RecordUpdated {
            table: SyncTable::Habits,
            record_id: "h1".to_string(),
            timestamp: Utc::now(),
        });
        let event = rx.recv().await.expect("event");
        assert!(matches!(event, AppEvent::RecordUpdated { ref record_id, .. } if record_id == "h1"));
    }

    #[test]
    fn event_type_tags_use_kebab_case_names() {
        let event = AppEvent::SyncStatus {
            state: SyncState::Idle,
            pending_operations: 0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sync-status");
    }
}
