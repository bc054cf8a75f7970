//! Client for the append-only remote sync event log.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::remote::{RemoteError, RemoteStore};

use super::model::SyncEvent;

/// Append-only event log. Appends are best-effort: the log is an audit and
/// detection aid, never a reason to fail a write.
pub struct EventLog {
    remote: Arc<dyn RemoteStore>,
}

impl EventLog {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Append one event, swallowing failures with a warning.
    pub async fn append(&self, event: SyncEvent) {
        if let Err(err) = self.remote.append_event(&event).await {
            log::warn!(
                "[Sync] Event log append failed for {} {}: {}",
                event.table,
                event.record_id,
                err
            );
        }
    }

    /// Events touching one record inside a time window.
    pub async fn record_events(
        &self,
        table: crate::models::SyncTable,
        record_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> std::result::Result<Vec<SyncEvent>, RemoteError> {
        self.remote.record_events(table, record_id, from, to).await
    }

    /// Drop events older than `max_age`. Returns the number removed.
    pub async fn prune(&self, max_age: Duration) -> std::result::Result<u64, RemoteError> {
        self.remote.prune_events(Utc::now() - max_age).await
    }
}
