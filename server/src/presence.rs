//! Connection and presence tracking for the duel server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Connection lifecycle (open, authenticate, disconnect)
//! - Binding a connection to a session and username
//! - Enforcing one live connection per username
//! - Capacity management and the lobby's online list
//!
//! The registry is owned by the engine and only mutated from the event loop,
//! so it holds plain maps with no locking.

use crate::error::AuthError;
use crate::sessions::SessionStore;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

pub type ConnectionId = u32;

/// Session attached to an authenticated connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub session_id: String,
    pub username: String,
}

/// One live transport channel
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Peer address, used for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// `None` until the connection authenticates
    pub binding: Option<SessionBinding>,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            binding: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.binding.is_some()
    }
}

/// Result of a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub username: String,
    /// Older connection of the same user that was unbound and must be closed
    pub evicted: Option<ConnectionId>,
}

/// Tracks all open connections and which user each one speaks for
///
/// Invariant: `by_username` holds exactly the authenticated connections, and
/// each username maps to at most one connection.
pub struct PresenceRegistry {
    connections: HashMap<ConnectionId, Connection>,
    by_username: HashMap<String, ConnectionId>,
    next_connection_id: ConnectionId,
    max_connections: usize,
}

impl PresenceRegistry {
    /// Creates an empty registry. Connection ids start at 1.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            by_username: HashMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Registers a freshly accepted socket
    ///
    /// Returns `None` when the server is at capacity.
    pub fn open_connection(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let connection_id = self.next_connection_id;
        self.next_connection_id = self.next_connection_id.wrapping_add(1).max(1);

        info!("Connection {} opened from {}", connection_id, addr);
        self.connections
            .insert(connection_id, Connection::new(connection_id, addr));
        Some(connection_id)
    }

    /// Binds `connection_id` to the user behind `session_id`
    ///
    /// If the same user is already bound to a different live connection, that
    /// connection is unbound and reported in [`AuthOutcome::evicted`] so the
    /// caller can notify and close it. A failed lookup leaves the connection
    /// exactly as it was.
    pub fn authenticate(
        &mut self,
        connection_id: ConnectionId,
        session_id: &str,
        sessions: &dyn SessionStore,
    ) -> Result<AuthOutcome, AuthError> {
        if !self.connections.contains_key(&connection_id) {
            return Err(AuthError::NotAuthenticated);
        }

        let username = sessions
            .resolve(session_id)
            .ok_or(AuthError::InvalidSession)?;

        // Same connection switching to another account drops the old binding first.
        if let Some(previous) = self.username_of(connection_id).map(str::to_owned) {
            if previous != username {
                self.release(connection_id);
            }
        }

        let evicted = match self.by_username.get(&username).copied() {
            Some(other) if other != connection_id => {
                if let Some(old) = self.connections.get_mut(&other) {
                    old.binding = None;
                }
                info!(
                    "User {} logged in elsewhere, evicting connection {}",
                    username, other
                );
                Some(other)
            }
            _ => None,
        };

        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.binding = Some(SessionBinding {
                session_id: session_id.to_string(),
                username: username.clone(),
            });
        }
        self.by_username.insert(username.clone(), connection_id);

        info!("Connection {} authenticated as {}", connection_id, username);
        Ok(AuthOutcome { username, evicted })
    }

    /// Removes the connection entirely
    ///
    /// Returns the username it was bound to, if any.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<String> {
        let connection = self.connections.remove(&connection_id)?;
        info!("Connection {} closed", connection.id);

        let username = connection.binding.map(|binding| binding.username)?;
        if self.by_username.get(&username) == Some(&connection_id) {
            self.by_username.remove(&username);
        }
        Some(username)
    }

    /// Unbinds the session but keeps the socket open (logout)
    pub fn release(&mut self, connection_id: ConnectionId) -> Option<SessionBinding> {
        let binding = self.connections.get_mut(&connection_id)?.binding.take()?;
        if self.by_username.get(&binding.username) == Some(&connection_id) {
            self.by_username.remove(&binding.username);
        }
        Some(binding)
    }

    pub fn username_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.connections
            .get(&connection_id)?
            .binding
            .as_ref()
            .map(|binding| binding.username.as_str())
    }

    pub fn session_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.connections
            .get(&connection_id)?
            .binding
            .as_ref()
            .map(|binding| binding.session_id.as_str())
    }

    pub fn connection_of(&self, username: &str) -> Option<ConnectionId> {
        self.by_username.get(username).copied()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.by_username.contains_key(username)
    }

    pub fn online_count(&self) -> usize {
        self.by_username.len()
    }

    /// Online usernames, sorted for stable lobby output
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.by_username.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn authenticated_connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.by_username.values().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    /// Number of open connections, authenticated or not
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
