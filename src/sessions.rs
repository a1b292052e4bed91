//! Ephemeral launch-session store.
//!
//! A `LaunchSession` is created at login initiation and consumed exactly
//! once when the tool posts its JWT back. Sessions live in process memory
//! only; they never outlive their TTL. Consumption is an atomic
//! check-and-mark under one lock, so a replayed JWT cannot win twice even
//! under concurrent requests. Consumed entries stay behind as tombstones
//! until the TTL sweep so a replay is distinguishable from an unknown
//! session.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::ContextType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPurpose {
    DeepLink,
    ResourceLink,
}

#[derive(Debug, Clone)]
pub struct LaunchSession {
    pub state: String,
    pub nonce: String,
    pub purpose: LaunchPurpose,
    pub target_link_uri: String,
    pub tool_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub user_id: String,
    pub context_id: String,
    pub context_type: ContextType,
    pub expires_at: DateTime<Utc>,
}

/// What the caller supplies; state/nonce/expiry are filled in by the store.
pub struct NewLaunchSession {
    pub purpose: LaunchPurpose,
    pub target_link_uri: String,
    pub tool_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub user_id: String,
    pub context_id: String,
    pub context_type: ContextType,
}

struct Entry {
    session: LaunchSession,
    consumed: bool,
}

pub struct SessionStore {
    ttl: Duration,
    // keyed by nonce; the nonce is what comes back inside the tool's JWT
    inner: Mutex<HashMap<String, Entry>>,
}

/// 256 bits of CSPRNG output, hex-encoded.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl SessionStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a fresh session. Every call gets independent
    /// state/nonce values; concurrent launches for the same user and
    /// assignment are never deduplicated.
    pub fn issue(&self, new: NewLaunchSession) -> LaunchSession {
        let session = LaunchSession {
            state: random_token(),
            nonce: random_token(),
            purpose: new.purpose,
            target_link_uri: new.target_link_uri,
            tool_id: new.tool_id,
            assignment_id: new.assignment_id,
            user_id: new.user_id,
            context_id: new.context_id,
            context_type: new.context_type,
            expires_at: Utc::now() + self.ttl,
        };
        let mut map = self.inner.lock().expect("session store poisoned");
        map.insert(
            session.nonce.clone(),
            Entry { session: session.clone(), consumed: false },
        );
        session
    }

    /// Read a session without consuming it. Used to look up the tool a JWT
    /// must be verified against before the nonce is burned.
    pub fn peek(&self, nonce: &str) -> Option<LaunchSession> {
        let map = self.inner.lock().expect("session store poisoned");
        map.get(nonce).map(|e| e.session.clone())
    }

    /// Single-use consumption: check-and-mark under the lock. Expired
    /// sessions are rejected, never extended.
    pub fn consume(&self, nonce: &str, now: DateTime<Utc>) -> Result<LaunchSession, ApiError> {
        let mut map = self.inner.lock().expect("session store poisoned");
        let entry = map.get_mut(nonce).ok_or(ApiError::UnknownState)?;
        if entry.consumed {
            return Err(ApiError::ReplaySession);
        }
        if entry.session.expires_at <= now {
            return Err(ApiError::ExpiredToken);
        }
        entry.consumed = true;
        Ok(entry.session.clone())
    }

    /// Evict everything past its expiry, tombstones included. Returns how
    /// many entries were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.inner.lock().expect("session store poisoned");
        let before = map.len();
        map.retain(|_, e| e.session.expires_at > now);
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> NewLaunchSession {
        NewLaunchSession {
            purpose: LaunchPurpose::ResourceLink,
            target_link_uri: "https://tool.example/resource/1".into(),
            tool_id: Uuid::new_v4(),
            assignment_id: Some(Uuid::new_v4()),
            user_id: "U1".into(),
            context_id: "C1".into(),
            context_type: ContextType::Section,
        }
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let store = SessionStore::new(600);
        let a = store.issue(new_session());
        let b = store.issue(new_session());
        // 64 hex chars = 256 bits
        assert_eq!(a.state.len(), 64);
        assert_eq!(a.nonce.len(), 64);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.state, b.state);
        assert_ne!(a.state, a.nonce);
    }

    #[test]
    fn consume_is_single_use() {
        let store = SessionStore::new(600);
        let s = store.issue(new_session());
        let got = store.consume(&s.nonce, Utc::now()).unwrap();
        assert_eq!(got.user_id, "U1");
        let err = store.consume(&s.nonce, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::ReplaySession));
    }

    #[test]
    fn unknown_nonce_rejected() {
        let store = SessionStore::new(600);
        let err = store.consume("deadbeef", Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::UnknownState));
    }

    #[test]
    fn expired_session_rejected() {
        let store = SessionStore::new(600);
        let s = store.issue(new_session());
        let later = Utc::now() + Duration::seconds(601);
        let err = store.consume(&s.nonce, later).unwrap_err();
        assert!(matches!(err, ApiError::ExpiredToken));
    }

    #[test]
    fn concurrent_launches_get_independent_sessions() {
        let store = SessionStore::new(600);
        let a = store.issue(new_session());
        let b = store.issue(new_session());
        store.consume(&a.nonce, Utc::now()).unwrap();
        // consuming one launch must not touch the other
        store.consume(&b.nonce, Utc::now()).unwrap();
    }

    #[test]
    fn sweep_drops_expired_and_tombstones() {
        let store = SessionStore::new(600);
        let s = store.issue(new_session());
        store.consume(&s.nonce, Utc::now()).unwrap();
        assert_eq!(store.sweep(Utc::now()), 0);
        let later = Utc::now() + Duration::seconds(601);
        assert_eq!(store.sweep(later), 1);
        // after the sweep the tombstone is gone, so a replay degrades
        // to unknown-state (the token itself is long expired by then)
        let err = store.consume(&s.nonce, later).unwrap_err();
        assert!(matches!(err, ApiError::UnknownState));
    }
}
