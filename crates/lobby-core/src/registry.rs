//! Session registry enforcing one connection per user.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lobby_protocol::{ConnectionId, UserId};
use std::convert::Infallible;
use tracing::{debug, trace};

/// Mapping from user ID to the connection that currently owns the session.
///
/// Updates for a single user are serialised by the map's shard lock, so two
/// connections claiming the same user at once each observe a distinct
/// previous owner.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, ConnectionId>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the connection that owns a user's session.
    #[must_use]
    pub fn get(&self, id: &UserId) -> Option<ConnectionId> {
        self.sessions.get(id).map(|entry| *entry.value())
    }

    /// Make `conn` the owner of `id`.
    ///
    /// Returns the previous owner if it was a different connection.
    pub fn set(&self, id: UserId, conn: ConnectionId) -> Option<ConnectionId> {
        let claimed: Result<_, Infallible> =
            self.claim(id, conn, |previous| Ok(previous.filter(|p| *p != conn)));
        match claimed {
            Ok(previous) => previous,
            Err(never) => match never {},
        }
    }

    /// Run `f` with the current owner of `id` while holding its lock, then
    /// make `conn` the owner if `f` succeeds.
    ///
    /// `f` must not touch this registry.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, leaving the registry unchanged.
    pub fn claim<T, E, F>(&self, id: UserId, conn: ConnectionId, f: F) -> Result<T, E>
    where
        F: FnOnce(Option<ConnectionId>) -> Result<T, E>,
    {
        match self.sessions.entry(id) {
            Entry::Occupied(mut entry) => {
                let value = f(Some(*entry.get()))?;
                let previous = entry.insert(conn);
                if previous != conn {
                    debug!(user = %entry.key(), previous = %previous, connection = %conn, "Session replaced");
                }
                Ok(value)
            }
            Entry::Vacant(entry) => {
                let value = f(None)?;
                debug!(user = %entry.key(), connection = %conn, "Session registered");
                entry.insert(conn);
                Ok(value)
            }
        }
    }

    /// Remove a user's session unconditionally.
    pub fn remove(&self, id: &UserId) -> Option<ConnectionId> {
        let removed = self.sessions.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!(user = %id, "Session removed");
        }
        removed
    }

    /// Remove a user's session only if `conn` still owns it.
    ///
    /// Returns `true` if the session was removed.
    pub fn release(&self, id: &UserId, conn: ConnectionId) -> bool {
        let released = self
            .sessions
            .remove_if(id, |_, owner| *owner == conn)
            .is_some();
        if released {
            debug!(user = %id, connection = %conn, "Session released");
        } else {
            trace!(user = %id, connection = %conn, "Release skipped, not the owner");
        }
        released
    }

    /// Snapshot all `(user, connection)` pairs.
    #[must_use]
    pub fn entries(&self) -> Vec<(UserId, ConnectionId)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Get the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
