//! Durable queue of pending remote writes.
//!
//! Entries are persisted to the local cache on every mutation so the queue
//! survives process restarts. Draining is single-flight, processes only
//! due entries, and backs off exponentially per entry; entries that can
//! never succeed are dropped up front.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::cache::{LocalCache, QUEUE_KEY};
use crate::errors::Result;
use crate::remote::RemoteStore;

use super::metrics::SyncMetrics;
use super::model::{
    retry_backoff_ms, OperationPayload, QueueEntry, MAX_RETRIES,
};
use super::validation::validate_entry;

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub processed: usize,
    pub synced: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// True when another drain was already in flight and this call did
    /// nothing.
    pub already_draining: bool,
}

pub struct OperationQueue {
    cache: Arc<dyn LocalCache>,
    entries: Mutex<Vec<QueueEntry>>,
    draining: AtomicBool,
    metrics: Arc<SyncMetrics>,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl OperationQueue {
    /// Load the persisted queue. A missing key is an empty queue; a
    /// corrupt payload is logged and reset rather than wedging startup.
    pub fn load(cache: Arc<dyn LocalCache>, metrics: Arc<SyncMetrics>) -> Self {
        let entries = match cache.get(QUEUE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    log::warn!("[Queue] Discarding corrupt persisted queue: {err}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                log::warn!("[Queue] Could not read persisted queue: {err}");
                Vec::new()
            }
        };

        if !entries.is_empty() {
            log::info!("[Queue] Loaded {} pending operation(s)", entries.len());
        }

        Self {
            cache,
            entries: Mutex::new(entries),
            draining: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of pending entries, for status surfaces and tests.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Append an entry and persist immediately. Only a local-cache failure
    /// can make this fail.
    pub fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        let mut entries = self.lock_entries()?;
        log::debug!(
            "[Queue] Enqueued {:?} for {} {}",
            entry.kind,
            entry.table,
            entry.payload.record_id()
        );
        entries.push(entry);
        self.persist(&entries)?;
        self.metrics.record_queued();
        Ok(())
    }

    /// Milliseconds until the earliest entry becomes due, if any.
    pub fn next_due_in_ms(&self, now_ms: i64) -> Option<i64> {
        let entries = self.entries.lock().ok()?;
        entries
            .iter()
            .map(|entry| entry.next_retry_at_ms.map_or(0, |at| (at - now_ms).max(0)))
            .min()
    }

    /// Drain due entries against the remote store.
    ///
    /// Single-flight: a second call while one is in progress returns
    /// immediately. Callers gate on connectivity; the queue itself does
    /// not probe the network.
    pub async fn process(&self, remote: &dyn RemoteStore) -> DrainOutcome {
        self.process_due(remote, Utc::now().timestamp_millis()).await
    }

    /// Drain entries due at `now_ms`. Split out so scheduling is testable.
    pub async fn process_due(&self, remote: &dyn RemoteStore, now_ms: i64) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return DrainOutcome {
                already_draining: true,
                ..DrainOutcome::default()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let due: Vec<QueueEntry> = match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .filter(|entry| entry.is_due(now_ms))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut outcome = DrainOutcome::default();
        for entry in due {
            outcome.processed += 1;

            if let Err(err) = validate_entry(&entry) {
                log::warn!("[Queue] Dropping invalid entry {}: {err}", entry.id);
                let _ = self.remove_entry(&entry.id);
                self.metrics.record_dropped();
                outcome.dropped += 1;
                continue;
            }

            let attempt = match &entry.payload {
                OperationPayload::Upsert(record) => remote.upsert(entry.table, record).await,
                OperationPayload::Delete { record_id, user_id } => {
                    remote
                        .delete(entry.table, record_id, user_id.as_deref().unwrap_or_default())
                        .await
                }
            };

            match attempt {
                Ok(()) => {
                    let _ = self.remove_entry(&entry.id);
                    self.metrics.record_replayed();
                    outcome.synced += 1;
                }
                Err(err) => {
                    let retries = entry.retries + 1;
                    if retries >= MAX_RETRIES {
                        log::warn!(
                            "[Queue] Dropping {} for {} {} after {} attempts: {}",
                            entry.id,
                            entry.table,
                            entry.payload.record_id(),
                            retries,
                            err
                        );
                        let _ = self.remove_entry(&entry.id);
                        self.metrics.record_dropped();
                        outcome.dropped += 1;
                    } else {
                        let delay = retry_backoff_ms(retries);
                        let _ = self.reschedule_entry(&entry.id, retries, now_ms + delay, &err);
                        outcome.requeued += 1;
                    }
                }
            }
        }

        outcome
    }

    /// Drop everything, including scheduled retries.
    pub fn clear(&self) -> Result<usize> {
        let mut entries = self.lock_entries()?;
        let removed = entries.len();
        entries.clear();
        self.persist(&entries)?;
        Ok(removed)
    }

    /// Drop entries that have already failed at least once.
    pub fn clear_failed(&self) -> Result<usize> {
        let mut entries = self.lock_entries()?;
        let before = entries.len();
        entries.retain(|entry| entry.retries == 0);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    /// Drop entries belonging to any other identity. Called when a new
    /// user signs in so a previous account's writes are never replayed
    /// under the wrong credentials.
    pub fn retain_user(&self, user_id: &str) -> Result<usize> {
        let mut entries = self.lock_entries()?;
        let before = entries.len();
        entries.retain(|entry| entry.payload.user_id() == Some(user_id));
        let removed = before - entries.len();
        if removed > 0 {
            log::info!("[Queue] Cleared {removed} stale operation(s) from a previous identity");
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    fn lock_entries(&self) -> Result<std::sync::MutexGuard<'_, Vec<QueueEntry>>> {
        self.entries.lock().map_err(|_| {
            crate::cache::CacheError::Unavailable("queue mutex poisoned".to_string()).into()
        })
    }

    fn remove_entry(&self, entry_id: &str) -> Result<()> {
        let mut entries = self.lock_entries()?;
        entries.retain(|entry| entry.id != entry_id);
        self.persist(&entries)
    }

    fn reschedule_entry(
        &self,
        entry_id: &str,
        retries: u32,
        next_retry_at_ms: i64,
        err: &crate::remote::RemoteError,
    ) -> Result<()> {
        let mut entries = self.lock_entries()?;
        if let Some(entry) = entries.iter_mut().find(|entry| entry.id == entry_id) {
            entry.retries = retries;
            entry.next_retry_at_ms = Some(next_retry_at_ms);
            entry.last_error = Some(err.to_string());
        }
        self.persist(&entries)
    }

    fn persist(&self, entries: &[QueueEntry]) -> Result<()> {
        let raw = serde_json::to_string(entries)?;
        self.cache.set(QUEUE_KEY, &raw)?;
        Ok(())
    }
}
