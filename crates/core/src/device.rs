//! Per-installation device identity.

use uuid::Uuid;

use crate::cache::{LocalCache, DEVICE_ID_KEY};
use crate::errors::Result;

/// Load the persisted device id, generating and storing one on first use.
///
/// The id is an opaque pseudo-random string reused for the lifetime of the
/// installation. It participates in conflict tiebreaking and carries no
/// security meaning.
pub fn load_or_create_device_id(cache: &dyn LocalCache) -> Result<String> {
    if let Some(existing) = cache.get(DEVICE_ID_KEY)? {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let device_id = Uuid::new_v4().to_string();
    cache.set(DEVICE_ID_KEY, &device_id)?;
    log::info!("[Sync] Generated device id {device_id}");
    Ok(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn device_id_is_stable_across_calls() {
        let cache = MemoryCache::new();
        let first = load_or_create_device_id(&cache).unwrap();
        let second = load_or_create_device_id(&cache).unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn blank_persisted_id_is_regenerated() {
        let cache = MemoryCache::new();
        cache.set(DEVICE_ID_KEY, "  ").unwrap();
        let id = load_or_create_device_id(&cache).unwrap();
        assert!(!id.trim().is_empty());
    }
}
