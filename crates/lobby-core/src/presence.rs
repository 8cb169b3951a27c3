//! Presence broadcasting for Lobby.
//!
//! Builds the roster of identified users, strips private fields from each
//! identity and fans events out to every open connection.

use lobby_protocol::codec::{self, MAX_EVENT_SIZE};
use lobby_protocol::{Identity, Roster, ServerEvent};
use std::collections::BTreeSet;
use std::ops::AddAssign;
use tracing::{debug, trace, warn};

use crate::connection::ConnectionSet;
use crate::registry::SessionRegistry;

/// Fields removed from identities before they leave the hub.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "password_hash",
    "email",
    "token",
    "session_token",
    "ip_address",
];

/// Projection removing private fields from identities.
///
/// `id` and `username` are always kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveFilter {
    fields: BTreeSet<String>,
}

impl SensitiveFilter {
    /// Create a filter removing the given fields.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if a field is removed by this filter.
    #[must_use]
    pub fn is_sensitive(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    /// Get a copy of `identity` without sensitive fields.
    #[must_use]
    pub fn filter(&self, identity: &Identity) -> Identity {
        let attributes = identity
            .attributes
            .iter()
            .filter(|(key, _)| !self.is_sensitive(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Identity {
            id: identity.id.clone(),
            username: identity.username.clone(),
            attributes,
        }
    }
}

impl Default for SensitiveFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS.iter().copied())
    }
}

/// Delivery counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the event was queued on.
    pub delivered: usize,
    /// Connections skipped because they were already closed.
    pub skipped: usize,
    /// Connections that closed while the event was being queued.
    pub failed: usize,
    /// Events that could not be encoded and reached nobody.
    pub encode_failed: usize,
}

impl AddAssign for BroadcastReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.encode_failed += other.encode_failed;
    }
}

/// Send an event to every open connection.
///
/// The event is serialized once. A failed send is counted and does not stop
/// delivery to the remaining connections.
pub fn broadcast(connections: &ConnectionSet, event: &ServerEvent) -> BroadcastReport {
    broadcast_with_limit(connections, event, MAX_EVENT_SIZE)
}

/// Send an event to every open connection, refusing encodings larger than
/// `max_event_size` bytes.
///
/// An event that cannot be encoded is counted in
/// [`BroadcastReport::encode_failed`] and sent to nobody.
pub fn broadcast_with_limit(
    connections: &ConnectionSet,
    event: &ServerEvent,
    max_event_size: usize,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    let payload = match codec::encode_with_limit(event, max_event_size) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                event = event.event_type(),
                connections = connections.len(),
                error = %e,
                "Failed to encode event"
            );
            report.encode_failed += 1;
            return report;
        }
    };

    for (id, outbox) in connections.outboxes() {
        if outbox.is_closed() {
            report.skipped += 1;
            continue;
        }

        match outbox.send(payload.clone()) {
            Ok(()) => report.delivered += 1,
            Err(_) => {
                debug!(connection = %id, event = event.event_type(), "Send failed");
                report.failed += 1;
            }
        }
    }

    trace!(
        event = event.event_type(),
        delivered = report.delivered,
        skipped = report.skipped,
        failed = report.failed,
        "Broadcast"
    );

    report
}

/// Build the roster of identified users.
///
/// Each registry entry contributes its owner's filtered identity, keyed by
/// the identity's ID. Owners that are gone or carry no identity are skipped.
#[must_use]
pub fn build_roster(
    registry: &SessionRegistry,
    connections: &ConnectionSet,
    filter: &SensitiveFilter,
) -> Roster {
    registry
        .entries()
        .into_iter()
        .filter_map(|(_, conn)| connections.identity_of(conn))
        .map(|identity| {
            let filtered = filter.filter(&identity);
            (filtered.id.as_str().to_owned(), filtered)
        })
        .collect()
}
