//! Local-first persistence layer: the single entry point for mutations.
//!
//! Every write lands in the local cache first and is never rolled back;
//! the remote store is attempted afterwards when a user is signed in, with
//! failures handed to the operation queue so no write is silently lost.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::{remove_from_collection, upsert_into_collection, LocalCache};
use crate::errors::Result;
use crate::models::{Record, SyncTable};
use crate::remote::{RemoteStore, RetryClass};

use super::event_log::EventLog;
use super::metrics::SyncMetrics;
use super::model::{
    OperationKind, PersistOutcome, QueueEntry, StoreScope, SyncEvent, SyncEventKind,
};
use super::queue::OperationQueue;
use super::validation::validate_record;

pub struct LocalFirstStore {
    cache: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<OperationQueue>,
    event_log: Arc<EventLog>,
    metrics: Arc<SyncMetrics>,
    device_id: String,
}

impl LocalFirstStore {
    pub fn new(
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
        queue: Arc<OperationQueue>,
        event_log: Arc<EventLog>,
        metrics: Arc<SyncMetrics>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            remote,
            queue,
            event_log,
            metrics,
            device_id: device_id.into(),
        }
    }

    /// Persist one record: local cache synchronously, then the remote
    /// store when `user_id` is present.
    ///
    /// Transient remote failures are absorbed into the queue and reported
    /// as a warning on a successful outcome. Non-transient remote failures
    /// are also queued (fail-open) but surface as an error. Without a
    /// user the write stays local-only.
    pub async fn save(&self, mut record: Record, user_id: Option<&str>) -> Result<PersistOutcome> {
        validate_record(&record)?;

        {
            let meta = record.meta_mut();
            meta.updated_at = Some(Utc::now());
            meta.device_id = Some(self.device_id.clone());
            if meta.user_id.is_none() {
                meta.user_id = user_id.map(str::to_string);
            }
        }

        let replaced = upsert_into_collection(self.cache.as_ref(), &record)?;
        self.metrics.record_local_write();

        let Some(user_id) = user_id else {
            return Ok(PersistOutcome {
                record_id: record.id().to_string(),
                stored: StoreScope::Local,
                pending_remote: false,
                warning: None,
            });
        };

        let table = record.table();
        let record_id = record.id().to_string();
        match self.remote.upsert(table, &record).await {
            Ok(()) => {
                self.metrics.record_remote_write();
                let kind = if replaced {
                    SyncEventKind::Update
                } else {
                    SyncEventKind::Insert
                };
                self.event_log
                    .append(SyncEvent::new(
                        kind,
                        table,
                        &record_id,
                        &self.device_id,
                        Some(user_id.to_string()),
                    ))
                    .await;
                Ok(PersistOutcome {
                    record_id,
                    stored: StoreScope::Both,
                    pending_remote: false,
                    warning: None,
                })
            }
            Err(err) => {
                let kind = if replaced {
                    OperationKind::Update
                } else {
                    OperationKind::Create
                };
                self.queue.enqueue(QueueEntry::upsert(kind, record))?;
                if err.retry_class() == RetryClass::Transient {
                    log::debug!(
                        "[Sync] Remote write deferred for {table} {record_id}: {err}"
                    );
                    Ok(PersistOutcome {
                        record_id,
                        stored: StoreScope::Both,
                        pending_remote: true,
                        warning: Some(format!("Remote write deferred: {err}")),
                    })
                } else {
                    log::warn!(
                        "[Sync] Remote write failed for {table} {record_id}, queued for retry: {err}"
                    );
                    Err(err.into())
                }
            }
        }
    }

    /// Remove one record: local cache immediately, then the remote store
    /// when `user_id` is present, with the same queueing semantics as
    /// [`save`](Self::save).
    pub async fn remove(
        &self,
        table: SyncTable,
        record_id: &str,
        user_id: Option<&str>,
    ) -> Result<PersistOutcome> {
        remove_from_collection(self.cache.as_ref(), table, record_id)?;
        self.metrics.record_local_write();

        let Some(user_id) = user_id else {
            return Ok(PersistOutcome {
                record_id: record_id.to_string(),
                stored: StoreScope::Local,
                pending_remote: false,
                warning: None,
            });
        };

        match self.remote.delete(table, record_id, user_id).await {
            Ok(()) => {
                self.metrics.record_remote_write();
                self.event_log
                    .append(SyncEvent::new(
                        SyncEventKind::Delete,
                        table,
                        record_id,
                        &self.device_id,
                        Some(user_id.to_string()),
                    ))
                    .await;
                Ok(PersistOutcome {
                    record_id: record_id.to_string(),
                    stored: StoreScope::Both,
                    pending_remote: false,
                    warning: None,
                })
            }
            Err(err) => {
                self.queue.enqueue(QueueEntry::delete(
                    table,
                    record_id,
                    Some(user_id.to_string()),
                ))?;
                if err.retry_class() == RetryClass::Transient {
                    log::debug!(
                        "[Sync] Remote delete deferred for {table} {record_id}: {err}"
                    );
                    Ok(PersistOutcome {
                        record_id: record_id.to_string(),
                        stored: StoreScope::Both,
                        pending_remote: true,
                        warning: Some(format!("Remote delete deferred: {err}")),
                    })
                } else {
                    log::warn!(
                        "[Sync] Remote delete failed for {table} {record_id}, queued for retry: {err}"
                    );
                    Err(err.into())
                }
            }
        }
    }
}
