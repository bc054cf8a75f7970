//! Initial reconciliation between the local cache and the remote store.
//!
//! Runs once per authenticated session. Collections are merged per table:
//! ids present on both sides go through the conflict resolver with the
//! local version favored on ties, ids present on one side only are kept.
//! A remote fetch failure degrades that table to local-only instead of
//! failing the sync.

use std::collections::HashMap;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cache::{read_collection, write_collection, LocalCache};
use crate::errors::Result;
use crate::events::{AppEvent, NotificationBus};
use crate::models::{Record, SyncTable};
use crate::remote::RemoteStore;

use super::conflict::{self, TiePolicy};
use super::event_log::EventLog;
use super::metrics::SyncMetrics;
use super::model::{SyncEvent, SyncEventKind, SyncReport, TableSyncSummary};
use super::projection::rebuild_activity_index;

pub struct InitialSyncManager {
    cache: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
    event_log: Arc<EventLog>,
    bus: NotificationBus,
    metrics: Arc<SyncMetrics>,
    device_id: String,
    /// Completed runs for this session. The lock is held across a whole
    /// run so a second caller waits and then gets the memoized report
    /// instead of fetching again.
    completed: Mutex<HashMap<String, SyncReport>>,
}

impl InitialSyncManager {
    pub fn new(
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
        event_log: Arc<EventLog>,
        bus: NotificationBus,
        metrics: Arc<SyncMetrics>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            remote,
            event_log,
            bus,
            metrics,
            device_id: device_id.into(),
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile all tables for `user_id`. Idempotent per session: a
    /// repeated call returns the memoized report without touching the
    /// network.
    pub async fn run(&self, user_id: &str) -> Result<SyncReport> {
        let mut completed = self.completed.lock().await;
        if let Some(report) = completed.get(user_id) {
            log::debug!("[Sync] Initial sync already completed for {user_id}");
            return Ok(report.clone());
        }

        log::info!("[Sync] Starting initial sync for {user_id}");
        let mut tables = Vec::with_capacity(SyncTable::ALL.len());
        for table in SyncTable::ALL {
            let summary = self.sync_table(table, user_id).await?;
            tables.push(summary);
        }

        let report = SyncReport {
            user_id: user_id.to_string(),
            tables,
            completed_at: Utc::now(),
        };
        completed.insert(user_id.to_string(), report.clone());

        // Emitted exactly once per run, after every collection write is
        // durable, so subscribers never read ahead of the merge.
        self.bus.emit(AppEvent::SyncComplete {
            report: report.clone(),
        });
        Ok(report)
    }

    async fn sync_table(&self, table: SyncTable, user_id: &str) -> Result<TableSyncSummary> {
        let local = read_collection(self.cache.as_ref(), table)?;

        let (remote_records, degraded) = match self.remote.select(table, user_id).await {
            Ok(records) => (records, false),
            Err(err) => {
                log::warn!(
                    "[Sync] Remote fetch failed for {table}, keeping local data only: {err}"
                );
                (Vec::new(), true)
            }
        };

        let local_count = local.len();
        let remote_count = remote_records.len();

        let mut remote_by_id: HashMap<String, Record> = remote_records
            .into_iter()
            .map(|record| (record.id().to_string(), record))
            .collect();

        let mut conflicts = 0usize;
        let mut merged = Vec::with_capacity(local_count + remote_by_id.len());
        for local_record in local {
            match remote_by_id.remove(local_record.id()) {
                Some(remote_record) => {
                    if remote_record == local_record {
                        merged.push(local_record);
                        continue;
                    }
                    let resolution = conflict::resolve(
                        local_record.meta(),
                        remote_record.meta(),
                        &self.device_id,
                        TiePolicy::PreferLocal,
                    );
                    let resolved =
                        conflict::merge(&local_record, &remote_record, resolution.winner)?;
                    conflicts += 1;
                    self.metrics.record_conflict();
                    self.event_log
                        .append(
                            SyncEvent::new(
                                SyncEventKind::ConflictResolved,
                                table,
                                resolved.id(),
                                &self.device_id,
                                Some(user_id.to_string()),
                            )
                            .with_metadata(serde_json::json!({
                                "winner": resolution.winner,
                                "reason": resolution.reason,
                                "phase": "initial_sync",
                            })),
                        )
                        .await;
                    merged.push(resolved);
                }
                None => merged.push(local_record),
            }
        }
        // Remaining remote records have no local counterpart; union them in.
        merged.extend(remote_by_id.into_values());

        let merged_count = merged.len();
        write_collection(self.cache.as_ref(), table, &merged)?;
        if table == SyncTable::Activities {
            rebuild_activity_index(self.cache.as_ref(), &merged)?;
        }

        Ok(TableSyncSummary {
            table,
            local_count,
            remote_count,
            merged_count,
            conflicts,
            degraded,
        })
    }

    /// Forget a user's completed run so the next sign-in reconciles again.
    pub async fn forget(&self, user_id: &str) {
        self.completed.lock().await.remove(user_id);
    }

    /// Forget all completed runs (session teardown).
    pub async fn forget_all(&self) {
        self.completed.lock().await.clear();
    }
}
