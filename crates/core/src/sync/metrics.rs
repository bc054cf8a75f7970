//! Lightweight sync counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct SyncMetrics {
    local_writes: AtomicU64,
    remote_writes: AtomicU64,
    queued: AtomicU64,
    replayed: AtomicU64,
    dropped: AtomicU64,
    duplicates: AtomicU64,
    conflicts: AtomicU64,
    realtime_applied: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_write(&self) {
        self.local_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_write(&self) {
        self.remote_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_realtime_applied(&self) {
        self.realtime_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            local_writes: self.local_writes.load(Ordering::Relaxed),
            remote_writes: self.remote_writes.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            realtime_applied: self.realtime_applied.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values, for status surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetricsSnapshot {
    pub local_writes: u64,
    pub remote_writes: u64,
    pub queued: u64,
    pub replayed: u64,
    pub dropped: u64,
    pub duplicates: u64,
    pub conflicts: u64,
    pub realtime_applied: u64,
}
