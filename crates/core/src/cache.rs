//! Local cache contract and collection helpers.
//!
//! The cache is plain key→string storage owned by the device. Writes are
//! synchronous-fast; a cache failure is fatal to the operation that hit it
//! since there is no durability layer beneath it.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::errors::Result;
use crate::models::{Record, SyncTable};

/// Key the per-installation device id is persisted under.
pub const DEVICE_ID_KEY: &str = "ritmo.device_id";

/// Key the pending operation queue is persisted under.
pub const QUEUE_KEY: &str = "ritmo.sync.queue";

/// Key of the date-indexed activities read model.
pub const ACTIVITIES_BY_DATE_KEY: &str = "ritmo.activities.by_date";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Local cache unavailable: {0}")]
    Unavailable(String),

    #[error("Local cache write failed for '{key}': {message}")]
    Write { key: String, message: String },

    #[error("Corrupt cache entry '{key}': {message}")]
    Corrupt { key: String, message: String },
}

/// Device-local key→string storage.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> std::result::Result<(), CacheError>;
    fn remove(&self, key: &str) -> std::result::Result<(), CacheError>;
}

/// Read a table's collection; an absent key is an empty collection.
pub fn read_collection(cache: &dyn LocalCache, table: SyncTable) -> Result<Vec<Record>> {
    let key = table.collection_key();
    let Some(raw) = cache.get(key)? else {
        return Ok(Vec::new());
    };
    let rows: Vec<serde_json::Value> =
        serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    rows.into_iter()
        .map(|row| {
            Record::from_row(table, row).map_err(|e| {
                CacheError::Corrupt {
                    key: key.to_string(),
                    message: e.to_string(),
                }
                .into()
            })
        })
        .collect()
}

/// Replace a table's collection wholesale.
pub fn write_collection(
    cache: &dyn LocalCache,
    table: SyncTable,
    records: &[Record],
) -> Result<()> {
    let rows = records
        .iter()
        .map(Record::to_row)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    cache.set(table.collection_key(), &serde_json::to_string(&rows)?)?;
    Ok(())
}

/// Insert-or-replace one record by id. Returns true when a previous
/// version was replaced.
pub fn upsert_into_collection(cache: &dyn LocalCache, record: &Record) -> Result<bool> {
    let table = record.table();
    let mut records = read_collection(cache, table)?;
    let existing = records.iter().position(|r| r.id() == record.id());
    let replaced = existing.is_some();
    match existing {
        Some(index) => records[index] = record.clone(),
        None => records.push(record.clone()),
    }
    write_collection(cache, table, &records)?;
    Ok(replaced)
}

/// Remove one record by id. Returns true when a record was removed.
pub fn remove_from_collection(
    cache: &dyn LocalCache,
    table: SyncTable,
    record_id: &str,
) -> Result<bool> {
    let mut records = read_collection(cache, table)?;
    let before = records.len();
    records.retain(|r| r.id() != record_id);
    if records.len() == before {
        return Ok(false);
    }
    write_collection(cache, table, &records)?;
    Ok(true)
}

/// In-process cache used by tests and by callers without a durable store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache mutex poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache mutex poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> std::result::Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache mutex poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HabitRecord, RecordMeta};

    fn habit(id: &str, name: &str) -> Record {
        Record::Habit(HabitRecord {
            meta: RecordMeta::new(id),
            name: name.to_string(),
            icon: None,
            color: None,
            target_per_week: 3,
            archived: false,
        })
    }

    #[test]
    fn missing_collection_reads_empty() {
        let cache = MemoryCache::new();
        let records = read_collection(&cache, SyncTable::Habits).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn upsert_replaces_by_id() {
        let cache = MemoryCache::new();
        assert!(!upsert_into_collection(&cache, &habit("h1", "Read")).unwrap());
        assert!(upsert_into_collection(&cache, &habit("h1", "Read more")).unwrap());
        assert!(!upsert_into_collection(&cache, &habit("h2", "Stretch")).unwrap());

        let records = read_collection(&cache, SyncTable::Habits).unwrap();
        assert_eq!(records.len(), 2);
        let Record::Habit(first) = &records[0] else {
            panic!("expected habit");
        };
        assert_eq!(first.name, "Read more");
    }

    #[test]
    fn remove_reports_whether_anything_was_removed() {
        let cache = MemoryCache::new();
        upsert_into_collection(&cache, &habit("h1", "Read")).unwrap();
        assert!(remove_from_collection(&cache, SyncTable::Habits, "h1").unwrap());
        assert!(!remove_from_collection(&cache, SyncTable::Habits, "h1").unwrap());
    }

    #[test]
    fn corrupt_collection_payload_is_fatal() {
        let cache = MemoryCache::new();
        cache.set(SyncTable::Habits.collection_key(), "not-json").unwrap();
        let err = read_collection(&cache, SyncTable::Habits).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Cache(CacheError::Corrupt { .. })
        ));
    }
}
