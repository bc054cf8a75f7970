//! Sync domain model: events, queue entries, outcomes, and tuning
//! constants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Record, SyncTable};

/// Attempts before a queued operation is dropped as permanently failed.
pub const MAX_RETRIES: u32 = 3;

/// Base retry delay; attempt n waits `RETRY_DELAY_MS * 2^(n-1)`.
pub const RETRY_DELAY_MS: i64 = 1_000;

/// Same-device duplicate window.
pub const SAME_DEVICE_TTL_MS: i64 = 5 * 60 * 1_000;

/// Event-log lookback around a candidate when checking other devices.
pub const CROSS_DEVICE_LOOKBACK_MS: i64 = 10_000;

/// Maximum delta under which two devices' inserts count as one write.
pub const CROSS_DEVICE_DUPLICATE_MS: i64 = 5_000;

/// Cadence of the in-memory duplicate-window sweep.
pub const DEDUP_SWEEP_INTERVAL_SECS: u64 = 60;

/// Timestamps closer than this are too close to trust ordering.
pub const TIE_WINDOW_MS: i64 = 1_000;

/// Age bound for the remote event log.
pub const EVENT_RETENTION_DAYS: i64 = 30;

/// Entry kinds in the append-only sync event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventKind {
    Insert,
    Update,
    Delete,
    Duplicate,
    ConflictResolved,
}

/// One observed write, appended on every successful remote mutation and on
/// duplicate/conflict handling. Never mutated; pruned by age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub event_type: SyncEventKind,
    pub table: SyncTable,
    pub record_id: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SyncEvent {
    pub fn new(
        event_type: SyncEventKind,
        table: SyncTable,
        record_id: impl Into<String>,
        device_id: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            event_type,
            table,
            record_id: record_id.into(),
            device_id: device_id.into(),
            user_id,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Write kinds a queue entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Payload of a queued operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPayload {
    Upsert(Record),
    Delete {
        record_id: String,
        user_id: Option<String>,
    },
}

impl OperationPayload {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            OperationPayload::Upsert(record) => record.meta().user_id.as_deref(),
            OperationPayload::Delete { user_id, .. } => user_id.as_deref(),
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            OperationPayload::Upsert(record) => record.id(),
            OperationPayload::Delete { record_id, .. } => record_id,
        }
    }
}

/// A pending write created while the remote store was unreachable.
///
/// Retry state lives on the entry itself (`retries`, `next_retry_at_ms`)
/// so that clearing the queue also cancels every scheduled retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub kind: OperationKind,
    pub table: SyncTable,
    pub payload: OperationPayload,
    pub queued_at_ms: i64,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn upsert(kind: OperationKind, record: Record) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            table: record.table(),
            payload: OperationPayload::Upsert(record),
            queued_at_ms: Utc::now().timestamp_millis(),
            retries: 0,
            next_retry_at_ms: None,
            last_error: None,
        }
    }

    pub fn delete(table: SyncTable, record_id: impl Into<String>, user_id: Option<String>) -> Self {
        let record_id = record_id.into();
        Self {
            id: Uuid::now_v7().to_string(),
            kind: OperationKind::Delete,
            table,
            payload: OperationPayload::Delete { record_id, user_id },
            queued_at_ms: Utc::now().timestamp_millis(),
            retries: 0,
            next_retry_at_ms: None,
            last_error: None,
        }
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_retry_at_ms.map_or(true, |at| at <= now_ms)
    }
}

/// Exponential backoff for the nth failure (n starting at 1), in ms.
pub fn retry_backoff_ms(retries: u32) -> i64 {
    let exponent = retries.saturating_sub(1).min(8);
    RETRY_DELAY_MS.saturating_mul(1_i64 << exponent)
}

/// Where a persisted write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreScope {
    Local,
    Both,
}

/// Outcome of a persistence-layer call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub record_id: String,
    pub stored: StoreScope,
    /// True when the remote write was deferred to the operation queue.
    pub pending_remote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Per-table summary of one initial-sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncSummary {
    pub table: SyncTable,
    pub local_count: usize,
    pub remote_count: usize,
    pub merged_count: usize,
    pub conflicts: usize,
    /// True when the remote fetch failed and the table stayed local-only.
    pub degraded: bool,
}

/// Completion payload of one initial-sync run, memoized per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub user_id: String,
    pub tables: Vec<TableSyncSummary>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_failure() {
        assert_eq!(retry_backoff_ms(1), 1_000);
        assert_eq!(retry_backoff_ms(2), 2_000);
        assert_eq!(retry_backoff_ms(3), 4_000);
        assert_eq!(retry_backoff_ms(20), retry_backoff_ms(9));
    }

    #[test]
    fn entries_without_schedule_are_due_immediately() {
        let entry = QueueEntry::delete(SyncTable::Habits, "h1", Some("u1".to_string()));
        assert!(entry.is_due(0));

        let mut scheduled = entry;
        scheduled.next_retry_at_ms = Some(1_000);
        assert!(!scheduled.is_due(999));
        assert!(scheduled.is_due(1_000));
    }

    #[test]
    fn event_kind_wire_names_are_uppercase() {
        assert_eq!(
            serde_json::to_string(&SyncEventKind::ConflictResolved).unwrap(),
            "\"CONFLICT_RESOLVED\""
        );
        assert_eq!(
            serde_json::to_string(&SyncEventKind::Insert).unwrap(),
            "\"INSERT\""
        );
    }
}
