//! REST implementation of the ritmo remote store.

mod client;
mod wire;

pub use client::RestRemoteStore;
