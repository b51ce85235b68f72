//! Session lifecycle: token issuance, last-activity tracking, TTL expiry.
//!
//! Sessions live in memory for the lifetime of the coordinator. Tokens are
//! minted from a monotonic counter on successful authentication and swept by
//! a background loop when idle past the configured TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct Session {
    pub authenticated: bool,
    pub last_activity: DateTime<Utc>,
    pub token: String,
    pub urn: String,
}

/// Mutex-guarded session table. All lookups and sweeps run under the one
/// lock; nothing is held across await points.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    counter: AtomicU64,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a session for an authenticated URN.
    pub fn create(&self, urn: &str, now: DateTime<Utc>) -> Session {
        let token = format!("session_{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let session = Session {
            authenticated: true,
            last_activity: now,
            token: token.clone(),
            urn: urn.to_string(),
        };

        self.sessions
            .lock()
            .expect("session mutex poisoned")
            .insert(token, session.clone());

        tracing::debug!(token = %session.token, urn = %urn, "Created session");
        session
    }

    /// Resolve a token to its owning URN, refreshing last activity.
    /// Returns None for unknown tokens.
    pub fn resolve(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        let session = sessions.get_mut(token)?;
        session.last_activity = now;
        Some(session.urn.clone())
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions
            .lock()
            .expect("session mutex poisoned")
            .get(token)
            .cloned()
    }

    /// Drop a session (explicit disconnect). Returns false when absent.
    pub fn remove(&self, token: &str) -> bool {
        self.sessions
            .lock()
            .expect("session mutex poisoned")
            .remove(token)
            .is_some()
    }

    /// Sweep sessions that are unauthenticated or idle past the TTL.
    /// Returns the number removed.
    pub fn sweep_expired(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        let before = sessions.len();
        sessions.retain(|_, s| s.authenticated && now - s.last_activity <= ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_monotonic_and_unique() {
        let registry = SessionRegistry::new();
        let now = Utc::now();

        let a = registry.create("1000000000001", now);
        let b = registry.create("1000000000002", now);
        assert_eq!(a.token, "session_1");
        assert_eq!(b.token, "session_2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn resolve_refreshes_last_activity() {
        let registry = SessionRegistry::new();
        let created = Utc::now();
        let session = registry.create("1000000000001", created);

        let later = created + Duration::seconds(90);
        assert_eq!(
            registry.resolve(&session.token, later).as_deref(),
            Some("1000000000001")
        );
        assert_eq!(registry.get(&session.token).unwrap().last_activity, later);

        assert!(registry.resolve("session_999", later).is_none());
    }

    #[test]
    fn sweep_removes_idle_sessions_only() {
        let registry = SessionRegistry::new();
        let now = Utc::now();

        let stale = registry.create("1000000000001", now - Duration::seconds(7200));
        let fresh = registry.create("1000000000002", now);

        let removed = registry.sweep_expired(Duration::seconds(3600), now);
        assert_eq!(removed, 1);
        assert!(registry.get(&stale.token).is_none());
        assert!(registry.get(&fresh.token).is_some());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = registry.create("1000000000001", Utc::now());

        assert!(registry.remove(&session.token));
        assert!(!registry.remove(&session.token));
        assert!(registry.is_empty());
    }
}
