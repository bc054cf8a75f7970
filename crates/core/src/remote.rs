//! Remote-store boundary: a table-oriented service reachable over a
//! network that can fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{Record, SyncTable};
use crate::sync::SyncEvent;

/// Retry policy class for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Transient,
    Permanent,
    ReauthRequired,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-shaped failure: unreachable, timeout, connection reset.
    #[error("Remote transport error: {0}")]
    Transport(String),

    /// Error response from the remote store.
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Payload could not be encoded or decoded.
    #[error("Remote payload error: {0}")]
    Payload(String),

    /// Missing or rejected credentials.
    #[error("Remote auth error: {0}")]
    Auth(String),
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Classify for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => RetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => RetryClass::Transient,
                500..=599 => RetryClass::Transient,
                _ => RetryClass::Permanent,
            },
            Self::Transport(_) => RetryClass::Transient,
            Self::Payload(_) => RetryClass::Permanent,
            Self::Auth(_) => RetryClass::ReauthRequired,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.retry_class() == RetryClass::Transient
    }
}

/// Change kinds pushed by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change notification for a subscribed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub table: SyncTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Record>,
    pub observed_at: DateTime<Utc>,
}

impl ChangeNotification {
    /// Id of the affected record, whichever side of the change carries it.
    pub fn record_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .map(Record::id)
            .or_else(|| self.old.as_ref().map(Record::id))
    }

    /// Device that produced the change, if the payload carries it.
    pub fn origin_device(&self) -> Option<&str> {
        self.new
            .as_ref()
            .and_then(|r| r.meta().device_id.as_deref())
            .or_else(|| self.old.as_ref().and_then(|r| r.meta().device_id.as_deref()))
    }

    /// Timestamp used for duplicate detection: the record's own freshness
    /// stamp when present, otherwise the observation time.
    pub fn change_timestamp(&self) -> DateTime<Utc> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|r| r.meta().effective_timestamp())
            .unwrap_or(self.observed_at)
    }
}

/// A live change subscription. Dropping the feed stops its backing task.
pub struct ChangeFeed {
    receiver: mpsc::Receiver<ChangeNotification>,
    task: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(receiver: mpsc::Receiver<ChangeNotification>, task: Option<JoinHandle<()>>) -> Self {
        Self { receiver, task }
    }

    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.receiver.recv().await
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Table-oriented remote store.
///
/// "Table not found" and "no rows" are benign empty results, never errors.
/// All other failures must be classifiable via [`RemoteError::retry_class`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert-or-replace keyed by record id.
    async fn upsert(&self, table: SyncTable, record: &Record)
        -> std::result::Result<(), RemoteError>;

    async fn delete(
        &self,
        table: SyncTable,
        record_id: &str,
        user_id: &str,
    ) -> std::result::Result<(), RemoteError>;

    /// Full collection for a user.
    async fn select(
        &self,
        table: SyncTable,
        user_id: &str,
    ) -> std::result::Result<Vec<Record>, RemoteError>;

    /// Append to the append-only sync event log.
    async fn append_event(&self, event: &SyncEvent) -> std::result::Result<(), RemoteError>;

    /// Events touching one record inside a time window.
    async fn record_events(
        &self,
        table: SyncTable,
        record_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> std::result::Result<Vec<SyncEvent>, RemoteError>;

    /// Age-based event-log cleanup; returns the number of events removed.
    async fn prune_events(&self, before: DateTime<Utc>) -> std::result::Result<u64, RemoteError>;

    /// Subscribe to change notifications for one table.
    async fn subscribe(
        &self,
        table: SyncTable,
        user_id: &str,
    ) -> std::result::Result<ChangeFeed, RemoteError>;
}
