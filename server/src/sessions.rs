//! Session token lookup.
//!
//! Issuing tokens (login/register) happens elsewhere; the server only needs
//! to resolve a token to a username and to revoke it on logout.

use crate::error::ServerError;
use log::info;
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

pub trait SessionStore: Send {
    /// Returns the username bound to a live session.
    fn resolve(&self, session_id: &str) -> Option<String>;

    fn revoke(&mut self, session_id: &str);
}

#[derive(Debug, Clone)]
struct SessionRecord {
    username: String,
    expires_at: Option<Instant>,
}

/// Process-local session table.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: HashMap<String, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON object of `sessionId -> username` pairs.
    pub fn from_json_file(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)?;
        let pairs: HashMap<String, String> = serde_json::from_str(&raw)?;

        let mut store = Self::new();
        for (session_id, username) in pairs {
            store.insert(session_id, username, None);
        }
        info!("Loaded {} sessions from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn insert(&mut self, session_id: impl Into<String>, username: impl Into<String>, ttl: Option<Duration>) {
        self.sessions.insert(
            session_id.into(),
            SessionRecord {
                username: username.into(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Creates a fresh random token for `username`.
    pub fn issue(&mut self, username: &str, ttl: Option<Duration>) -> String {
        let mut rng = rand::thread_rng();
        let session_id: String = (0..2)
            .map(|_| format!("{:016x}", rng.gen::<u64>()))
            .collect();
        self.insert(session_id.clone(), username, ttl);
        session_id
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn resolve(&self, session_id: &str) -> Option<String> {
        let record = self.sessions.get(session_id)?;
        match record.expires_at {
            Some(expires_at) if expires_at <= Instant::now() => None,
            _ => Some(record.username.clone()),
        }
    }

    fn revoke(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}
