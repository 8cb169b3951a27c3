//! Live connections tracked by the hub.
//!
//! The transport owns the socket; the hub only keeps the sending half of each
//! connection's outbound queue plus the identity the connection claimed.

use bytes::Bytes;
use dashmap::DashMap;
use lobby_protocol::{ConnectionId, Identity, UserId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Bytes>;

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection is not in the set.
    #[error("Connection not tracked: {0}")]
    NotTracked(ConnectionId),
}

/// A live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbox: Outbox,
    identity: Option<Identity>,
}

impl Connection {
    /// Create a connection around an existing outbound queue.
    #[must_use]
    pub fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            identity: None,
        }
    }

    /// Create a connection with a fresh ID and outbound queue.
    ///
    /// The receiver must be drained by the transport for the connection to
    /// count as open.
    #[must_use]
    pub fn open() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(ConnectionId::next(), tx), rx)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Consume the connection, returning its identity.
    #[must_use]
    pub fn into_identity(self) -> Option<Identity> {
        self.identity
    }
}

/// The set of live connections.
///
/// The transport inserts on accept and removes on close; everything else
/// reads snapshots so iteration never holds a shard lock while sending.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionSet {
    /// Create an empty connection set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    ///
    /// Returns `true` if the connection was not already tracked.
    pub fn insert(&self, connection: Connection) -> bool {
        let id = connection.id();
        let is_new = self.connections.insert(id, connection).is_none();
        debug!(connection = %id, connections = self.connections.len(), "Connection tracked");
        is_new
    }

    /// Stop tracking a connection, returning it.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!(connection = %id, connections = self.connections.len(), "Connection untracked");
        }
        removed
    }

    /// Check if a connection is tracked.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Get the number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Attach an identity to a connection.
    ///
    /// Returns the identity the connection carried before.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not tracked.
    pub fn attach_identity(
        &self,
        id: ConnectionId,
        identity: Identity,
    ) -> Result<Option<Identity>, ConnectionError> {
        let mut entry = self
            .connections
            .get_mut(&id)
            .ok_or(ConnectionError::NotTracked(id))?;
        Ok(entry.identity.replace(identity))
    }

    /// Clear a connection's identity if it belongs to `user_id`.
    ///
    /// Returns the cleared identity.
    pub fn detach_identity(&self, id: ConnectionId, user_id: &UserId) -> Option<Identity> {
        let mut entry = self.connections.get_mut(&id)?;
        if entry.identity.as_ref().is_some_and(|i| &i.id == user_id) {
            entry.identity.take()
        } else {
            None
        }
    }

    /// Get a copy of a connection's identity.
    #[must_use]
    pub fn identity_of(&self, id: ConnectionId) -> Option<Identity> {
        self.connections
            .get(&id)
            .and_then(|conn| conn.identity.clone())
    }

    /// Snapshot every connection's ID and outbound queue.
    #[must_use]
    pub fn outboxes(&self) -> Vec<(ConnectionId, Outbox)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().outbox.clone()))
            .collect()
    }
}
