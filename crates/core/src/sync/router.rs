//! Fan-out of remote change notifications into the local cache.
//!
//! One task per subscribed table. Changes from this device are skipped
//! (already applied locally), duplicates are filtered, and every applied
//! change is surfaced on the notification bus so UI layers refresh without
//! re-fetching.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::cache::{remove_from_collection, upsert_into_collection, LocalCache};
use crate::errors::Result;
use crate::events::{AppEvent, NotificationBus};
use crate::models::SyncTable;
use crate::remote::{ChangeFeed, ChangeKind, ChangeNotification, RemoteStore};

use super::dedup::DuplicateDetector;
use super::event_log::EventLog;
use super::metrics::SyncMetrics;
use super::model::{SyncEvent, SyncEventKind};

#[derive(Clone)]
struct RouterShared {
    cache: Arc<dyn LocalCache>,
    dedup: Arc<DuplicateDetector>,
    event_log: Arc<EventLog>,
    bus: NotificationBus,
    metrics: Arc<SyncMetrics>,
    device_id: String,
}

pub struct ChangeRouter {
    shared: RouterShared,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChangeRouter {
    pub fn new(
        cache: Arc<dyn LocalCache>,
        dedup: Arc<DuplicateDetector>,
        event_log: Arc<EventLog>,
        bus: NotificationBus,
        metrics: Arc<SyncMetrics>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            shared: RouterShared {
                cache,
                dedup,
                event_log,
                bus,
                metrics,
                device_id: device_id.into(),
            },
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to every table for `user_id`. Any previous identity's
    /// subscriptions are torn down first so events cannot leak across
    /// accounts. Per-table subscription failures degrade that table with
    /// a warning rather than failing the whole start.
    pub async fn start(&self, remote: &Arc<dyn RemoteStore>, user_id: &str) -> Result<()> {
        self.stop();

        let mut handles = Vec::with_capacity(SyncTable::ALL.len());
        for table in SyncTable::ALL {
            match remote.subscribe(table, user_id).await {
                Ok(feed) => {
                    let shared = self.shared.clone();
                    let user = user_id.to_string();
                    handles.push(tokio::spawn(route_feed(shared, feed, table, user)));
                }
                Err(err) => {
                    log::warn!("[Router] Subscription failed for {table}: {err}");
                }
            }
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            *tasks = handles;
        }
        Ok(())
    }

    /// Tear down all subscriptions.
    pub fn stop(&self) {
        let Ok(mut tasks) = self.tasks.lock() else {
            return;
        };
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) async fn apply_for_test(
        &self,
        change: ChangeNotification,
        user_id: &str,
    ) -> Result<bool> {
        apply_change(&self.shared, change, user_id).await
    }
}

impl Drop for ChangeRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn route_feed(shared: RouterShared, mut feed: ChangeFeed, table: SyncTable, user_id: String) {
    while let Some(change) = feed.recv().await {
        if let Err(err) = apply_change(&shared, change, &user_id).await {
            log::warn!("[Router] Failed to apply change on {table}: {err}");
        }
    }
    log::debug!("[Router] Change feed for {table} closed");
}

/// Apply one change notification. Returns true when the cache was
/// mutated.
async fn apply_change(
    shared: &RouterShared,
    change: ChangeNotification,
    user_id: &str,
) -> Result<bool> {
    let table = change.table;
    let Some(record_id) = change.record_id().map(str::to_string) else {
        log::warn!("[Router] Change on {table} carries no record id");
        return Ok(false);
    };

    let origin = change.origin_device().unwrap_or("unknown").to_string();
    if origin == shared.device_id {
        // Our own write echoed back.
        return Ok(false);
    }

    if shared
        .dedup
        .is_duplicate(table, &record_id, &origin, change.change_timestamp())
        .await
    {
        shared.metrics.record_duplicate();
        return Ok(false);
    }

    let applied_kind = match change.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(record) = change.new else {
                log::warn!("[Router] {table} upsert change without a new row");
                return Ok(false);
            };
            upsert_into_collection(shared.cache.as_ref(), &record)?;
            shared.bus.emit(AppEvent::RecordUpdated {
                table,
                record_id: record_id.clone(),
                timestamp: Utc::now(),
            });
            if change.kind == ChangeKind::Insert {
                SyncEventKind::Insert
            } else {
                SyncEventKind::Update
            }
        }
        ChangeKind::Delete => {
            remove_from_collection(shared.cache.as_ref(), table, &record_id)?;
            shared.bus.emit(AppEvent::RecordRemoved {
                table,
                record_id: record_id.clone(),
                timestamp: Utc::now(),
            });
            SyncEventKind::Delete
        }
    };

    shared.metrics.record_realtime_applied();
    // Observation record for audit, not replay.
    shared
        .event_log
        .append(
            SyncEvent::new(
                applied_kind,
                table,
                &record_id,
                &shared.device_id,
                Some(user_id.to_string()),
            )
            .with_metadata(serde_json::json!({
                "observedFrom": origin,
            })),
        )
        .await;

    Ok(true)
}
