//! Key→string cache on a single SQLite table.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use ritmo_core::cache::{CacheError, LocalCache};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Durable [`LocalCache`] implementation.
///
/// Access goes through one connection behind a mutex; cache calls are
/// short synchronous reads/writes, which matches the local-cache model of
/// the sync core.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        log::debug!("Opening local cache at {}", path.as_ref().display());
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Transient cache for tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, CacheError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CacheError::Unavailable("cache connection mutex poisoned".to_string()))?;
        op(&conn).map_err(|err| CacheError::Unavailable(err.to_string()))
    }
}

impl LocalCache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value],
            )
            .map(|_| ())
        })
        .map_err(|err| match err {
            CacheError::Unavailable(message) => CacheError::Write {
                key: key.to_string(),
                message,
            },
            other => other,
        })
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ritmo_core::cache::{read_collection, upsert_into_collection};
    use ritmo_core::models::{HabitRecord, Record, RecordMeta, SyncTable};

    #[test]
    fn set_get_remove_roundtrip() {
        let cache = SqliteCache::open_in_memory().unwrap();
        assert_eq!(cache.get("missing").unwrap(), None);

        cache.set("k", "v1").unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v1"));

        cache.set("k", "v2").unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v2"));

        cache.remove("k").unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn cache_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ritmo.db");

        {
            let cache = SqliteCache::open(&path).unwrap();
            cache.set("ritmo.device_id", "device-123").unwrap();
        }

        let reopened = SqliteCache::open(&path).unwrap();
        assert_eq!(
            reopened.get("ritmo.device_id").unwrap().as_deref(),
            Some("device-123")
        );
    }

    #[test]
    fn collection_helpers_work_over_sqlite() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let record = Record::Habit(HabitRecord {
            meta: RecordMeta::new("c0ffee00-1111-4222-8333-444444444444"),
            name: "Hydrate".to_string(),
            icon: None,
            color: None,
            target_per_week: 7,
            archived: false,
        });

        upsert_into_collection(&cache, &record).unwrap();
        let records = read_collection(&cache, SyncTable::Habits).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), "c0ffee00-1111-4222-8333-444444444444");
    }
}
