//! Identity-provider boundary.
//!
//! Authentication itself is external; the core only needs the current user
//! id, a bearer token for the remote store, and sign-in/sign-out
//! transitions to start and stop sync.

use tokio::sync::broadcast;

/// An authenticated session as seen by the sync core.
#[derive(Clone, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UserSession")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(UserSession),
    SignedOut,
}

/// Opaque identity provider supplying the session and its lifecycle.
pub trait IdentityProvider: Send + Sync {
    fn current_session(&self) -> Option<UserSession>;
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_debug_redacts_token() {
        let session = UserSession {
            user_id: "u1".to_string(),
            access_token: "secret-token".to_string(),
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
