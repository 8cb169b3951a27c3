//! Inbound message dispatch.
//!
//! The dispatcher turns an identify frame into the full join sequence:
//! lookup, duplicate-session eviction, registration and roster broadcast.

use lobby_protocol::codec::{self, MAX_EVENT_SIZE};
use lobby_protocol::{ClientMessage, ConnectionId, Identity, ServerEvent, UserId};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionError, ConnectionSet};
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::identity::IdentityLookup;
use crate::presence::{broadcast_with_limit, build_roster, BroadcastReport, SensitiveFilter};
use crate::registry::SessionRegistry;

/// Result of dispatching one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame was not a recognised message, or came from an untracked
    /// connection.
    Ignored,
    /// No identity exists for the claimed ID.
    UnknownIdentity(UserId),
    /// The connection now owns the user's session.
    Joined {
        /// The user that joined.
        user_id: UserId,
        /// Connection evicted from the session, if any.
        evicted: Option<ConnectionId>,
        /// Combined delivery counts of the broadcasts sent.
        report: BroadcastReport,
    },
}

/// Orchestrates identify handling over shared hub state.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionSet>,
    lookup: Arc<dyn IdentityLookup>,
    diagnostics: Arc<dyn Diagnostics>,
    filter: SensitiveFilter,
    max_event_size: usize,
}

impl Dispatcher {
    /// Create a dispatcher with empty state, tracing diagnostics and the
    /// default sensitive field filter.
    #[must_use]
    pub fn new(lookup: Arc<dyn IdentityLookup>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            connections: Arc::new(ConnectionSet::new()),
            lookup,
            diagnostics: Arc::new(TracingDiagnostics),
            filter: SensitiveFilter::default(),
            max_event_size: MAX_EVENT_SIZE,
        }
    }

    /// Use existing registry and connection set.
    #[must_use]
    pub fn with_state(
        mut self,
        registry: Arc<SessionRegistry>,
        connections: Arc<ConnectionSet>,
    ) -> Self {
        self.registry = registry;
        self.connections = connections;
        self
    }

    /// Use a custom diagnostics sink.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Use a custom sensitive field filter.
    #[must_use]
    pub fn with_filter(mut self, filter: SensitiveFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Limit the encoded size of outbound events.
    #[must_use]
    pub fn with_max_event_size(mut self, max_event_size: usize) -> Self {
        self.max_event_size = max_event_size;
        self
    }

    /// Get the session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Get the connection set.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    /// Handle a raw frame received on `conn`.
    ///
    /// Frames that do not decode to a known message are ignored without
    /// side effects.
    pub async fn on_message(&self, conn: ConnectionId, frame: &[u8]) -> DispatchOutcome {
        match codec::decode(frame) {
            Ok(ClientMessage::Identify { user_id }) => self.identify(conn, user_id).await,
            Ok(ClientMessage::Unrecognized) => {
                trace!(connection = %conn, "Ignoring unrecognized message");
                DispatchOutcome::Ignored
            }
            Err(e) => {
                trace!(connection = %conn, error = %e, "Ignoring undecodable frame");
                DispatchOutcome::Ignored
            }
        }
    }

    /// Bind `conn` to the user `requested` names, evicting any other session
    /// for that user and announcing the result to every connection.
    pub async fn identify(&self, conn: ConnectionId, requested: UserId) -> DispatchOutcome {
        let identity = match self.lookup.get_by_id(&requested).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                self.diagnostics.log(&format!("ID {requested} not found."));
                return DispatchOutcome::UnknownIdentity(requested);
            }
            Err(e) => {
                warn!(user = %requested, error = %e, "Identity lookup failed");
                self.diagnostics.log(&format!("ID {requested} not found."));
                return DispatchOutcome::UnknownIdentity(requested);
            }
        };

        // Sessions are keyed by the record's own ID.
        let user_id = identity.id.clone();
        let username = identity.username.clone();

        let claimed = self.registry.claim(user_id.clone(), conn, |owner| {
            let previous_identity = self.connections.attach_identity(conn, identity)?;
            let evicted = owner.filter(|owner| *owner != conn).map(|owner| {
                let evicted_identity = self.connections.detach_identity(owner, &user_id);
                (owner, evicted_identity)
            });
            Ok::<_, ConnectionError>((previous_identity, evicted))
        });

        let (previous_identity, evicted) = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                debug!(connection = %conn, user = %user_id, error = %e, "Identify from untracked connection");
                return DispatchOutcome::Ignored;
            }
        };

        if let Some(previous) = previous_identity.filter(|p| p.id != user_id) {
            self.registry.release(&previous.id, conn);
            debug!(connection = %conn, from = %previous.id, to = %user_id, "Connection switched user");
        }

        let mut report = BroadcastReport::default();

        let evicted = evicted.map(|(owner, evicted_identity)| {
            let evicted_name = evicted_identity
                .as_ref()
                .map_or("Unknown", |identity: &Identity| identity.username.as_str());
            self.diagnostics.log(&format!(
                "User {evicted_name} had a duplicate session. Previous session has been removed."
            ));
            info!(user = %user_id, evicted = %owner, connection = %conn, "Duplicate session evicted");

            // The event echoes the ID as the client sent it.
            report += self.broadcast(&ServerEvent::duplicate_session(requested.clone(), owner));
            owner
        });

        self.diagnostics
            .log(&format!("{username} has joined the adventure"));

        let roster = build_roster(&self.registry, &self.connections, &self.filter);
        debug!(connection = %conn, user = %user_id, roster = roster.len(), "User joined");
        report += self.broadcast(&ServerEvent::user_update(roster));

        DispatchOutcome::Joined {
            user_id,
            evicted,
            report,
        }
    }

    fn broadcast(&self, event: &ServerEvent) -> BroadcastReport {
        broadcast_with_limit(&self.connections, event, self.max_event_size)
    }

    /// Removal hook for the transport: forget `conn` and release the session
    /// it owns, if it still owns one.
    ///
    /// Returns the user whose session was released.
    pub fn disconnect(&self, conn: ConnectionId) -> Option<UserId> {
        let identity = self.connections.remove(conn)?.into_identity()?;

        if self.registry.release(&identity.id, conn) {
            debug!(connection = %conn, user = %identity.id, "Session closed");
            Some(identity.id)
        } else {
            None
        }
    }
}
