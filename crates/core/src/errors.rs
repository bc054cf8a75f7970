//! Error types shared across the core crate.

use thiserror::Error;

use crate::cache::CacheError;
use crate::remote::RemoteError;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Local cache failure. The one fatal path: if the device cannot
    /// durably record intent there is nothing beneath local-first to fall
    /// back to.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Remote store failure surfaced to a caller (transient failures are
    /// normally absorbed by the operation queue instead).
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record or queue entry rejected before any write was attempted.
    #[error("Validation failed: {0}")]
    Validation(String),
}
