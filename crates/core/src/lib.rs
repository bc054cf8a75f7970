//! Offline-first data core for the ritmo habit/activity tracker.
//!
//! Every mutation lands in the device-local cache first and is mirrored to
//! the cloud store when a user is signed in. Writes that cannot reach the
//! remote are queued and replayed; concurrent writes from other devices are
//! reconciled with last-write-wins plus a deterministic tiebreak.

pub mod auth;
pub mod cache;
pub mod device;
pub mod errors;
pub mod events;
pub mod models;
pub mod remote;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{Error, Result};
