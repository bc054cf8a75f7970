//! Duplicate detection for incoming write events.
//!
//! Re-deliveries from the same device are caught by a short-lived
//! in-memory window; near-simultaneous creates from different devices are
//! caught by querying the remote event log around the candidate's
//! timestamp. Neither tier requires a global lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::models::SyncTable;

use super::event_log::EventLog;
use super::model::{
    SyncEvent, SyncEventKind, CROSS_DEVICE_DUPLICATE_MS, CROSS_DEVICE_LOOKBACK_MS,
    SAME_DEVICE_TTL_MS,
};

pub struct DuplicateDetector {
    /// `table:record:device` → last seen timestamp (epoch ms).
    seen: Mutex<HashMap<String, i64>>,
    event_log: Arc<EventLog>,
}

impl DuplicateDetector {
    pub fn new(event_log: Arc<EventLog>) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            event_log,
        }
    }

    fn window_key(table: SyncTable, record_id: &str, device_id: &str) -> String {
        format!("{table}:{record_id}:{device_id}")
    }

    /// Decide whether an incoming event is a re-delivery or a cross-device
    /// race on the same record. Clean events are registered for future
    /// checks. An event-log query failure fails open: the candidate is
    /// treated as fresh rather than dropped.
    pub async fn is_duplicate(
        &self,
        table: SyncTable,
        record_id: &str,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let candidate_ms = timestamp.timestamp_millis();
        let key = Self::window_key(table, record_id, device_id);

        let same_device_hit = {
            match self.seen.lock() {
                Ok(seen) => seen
                    .get(&key)
                    .is_some_and(|prev| (candidate_ms - prev).abs() < SAME_DEVICE_TTL_MS),
                Err(_) => false,
            }
        };
        if same_device_hit {
            log::debug!("[Sync] Same-device duplicate for {table} {record_id} from {device_id}");
            self.log_duplicate(table, record_id, device_id, "same_device")
                .await;
            return true;
        }

        if self
            .cross_device_duplicate(table, record_id, device_id, timestamp)
            .await
        {
            self.log_duplicate(table, record_id, device_id, "cross_device")
                .await;
            return true;
        }

        if let Ok(mut seen) = self.seen.lock() {
            seen.insert(key, candidate_ms);
        }
        false
    }

    async fn cross_device_duplicate(
        &self,
        table: SyncTable,
        record_id: &str,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let lookback = Duration::milliseconds(CROSS_DEVICE_LOOKBACK_MS);
        let events = match self
            .event_log
            .record_events(table, record_id, timestamp - lookback, timestamp + lookback)
            .await
        {
            Ok(events) => events,
            Err(err) => {
                log::warn!(
                    "[Sync] Duplicate check query failed for {table} {record_id}: {err}"
                );
                return false;
            }
        };

        let candidate_ms = timestamp.timestamp_millis();
        events.iter().any(|event| {
            event.event_type == SyncEventKind::Insert
                && event.device_id != device_id
                && (event.timestamp.timestamp_millis() - candidate_ms).abs()
                    < CROSS_DEVICE_DUPLICATE_MS
        })
    }

    async fn log_duplicate(
        &self,
        table: SyncTable,
        record_id: &str,
        device_id: &str,
        source: &str,
    ) {
        let event = SyncEvent::new(
            SyncEventKind::Duplicate,
            table,
            record_id,
            device_id,
            None,
        )
        .with_metadata(serde_json::json!({ "source": source }));
        self.event_log.append(event).await;
    }

    /// Evict window entries older than the TTL. Returns the number evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp_millis() - SAME_DEVICE_TTL_MS;
        let Ok(mut seen) = self.seen.lock() else {
            return 0;
        };
        let before = seen.len();
        seen.retain(|_, &mut last_seen| last_seen > cutoff);
        before - seen.len()
    }

    /// Drop the whole window (identity change).
    pub fn clear(&self) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn window_len(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryRemoteStore;

    fn detector(remote: Arc<MemoryRemoteStore>) -> DuplicateDetector {
        DuplicateDetector::new(Arc::new(EventLog::new(remote)))
    }

    #[tokio::test]
    async fn second_delivery_from_same_device_is_duplicate() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let detector = detector(remote);
        let base = Utc::now();

        assert!(
            !detector
                .is_duplicate(SyncTable::Activities, "r2", "dA", base)
                .await
        );
        // 100 ms later, same device and record.
        assert!(
            detector
                .is_duplicate(
                    SyncTable::Activities,
                    "r2",
                    "dA",
                    base + Duration::milliseconds(100)
                )
                .await
        );
    }

    #[tokio::test]
    async fn racing_insert_from_other_device_is_duplicate() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let base = Utc::now();
        let mut event = SyncEvent::new(
            SyncEventKind::Insert,
            SyncTable::Habits,
            "h1",
            "device_a",
            Some("u1".to_string()),
        );
        event.timestamp = base;
        remote.seed_event(event);

        let detector = detector(remote);
        assert!(
            detector
                .is_duplicate(
                    SyncTable::Habits,
                    "h1",
                    "device_b",
                    base + Duration::milliseconds(3_000)
                )
                .await
        );
    }

    #[tokio::test]
    async fn distant_insert_from_other_device_is_not_duplicate() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let base = Utc::now();
        let mut event = SyncEvent::new(
            SyncEventKind::Insert,
            SyncTable::Habits,
            "h1",
            "device_a",
            Some("u1".to_string()),
        );
        event.timestamp = base;
        remote.seed_event(event);

        let detector = detector(remote);
        assert!(
            !detector
                .is_duplicate(
                    SyncTable::Habits,
                    "h1",
                    "device_b",
                    base + Duration::milliseconds(7_000)
                )
                .await
        );
    }

    #[tokio::test]
    async fn event_log_outage_fails_open() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_offline(true);
        let detector = detector(remote);
        assert!(
            !detector
                .is_duplicate(SyncTable::Habits, "h1", "device_b", Utc::now())
                .await
        );
    }

    #[tokio::test]
    async fn sweep_evicts_expired_entries() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let detector = detector(remote);
        let base = Utc::now();
        detector
            .is_duplicate(SyncTable::Habits, "h1", "dA", base)
            .await;
        assert_eq!(detector.window_len(), 1);

        assert_eq!(detector.sweep(base + Duration::minutes(6)), 1);
        assert_eq!(detector.window_len(), 0);
    }
}
