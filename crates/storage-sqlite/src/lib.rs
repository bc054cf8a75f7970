//! SQLite-backed local cache for the ritmo data core.

mod cache;

pub use cache::{SqliteCache, StorageError};
