//! Message shapes exchanged between clients and the hub.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{ConnectionId, Identity, UserId};

/// Identified users keyed by the canonical form of their ID, as sent in
/// `userUpdate`. JSON object keys are always strings.
pub type Roster = BTreeMap<String, Identity>;

/// Field carrying the user ID in an inbound frame.
pub const USER_ID_FIELD: &str = "userId";

/// A message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// The client announces which user it belongs to.
    Identify {
        /// Claimed user ID.
        user_id: UserId,
    },
    /// Any JSON value that is not a recognised message.
    Unrecognized,
}

impl ClientMessage {
    /// Classify a parsed JSON value.
    ///
    /// Only an object whose `userId` is a non-null scalar is an identify
    /// message; everything else, including `"userId": null`, is unrecognised.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut fields) = value else {
            return Self::Unrecognized;
        };

        fields
            .remove(USER_ID_FIELD)
            .and_then(UserId::from_value)
            .map_or(Self::Unrecognized, |user_id| Self::Identify { user_id })
    }

    /// Build an identify message.
    #[must_use]
    pub fn identify(user_id: impl Into<UserId>) -> Self {
        Self::Identify {
            user_id: user_id.into(),
        }
    }
}

/// An event pushed from the hub to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A newer connection claimed a user, evicting the older one.
    #[serde(rename = "userDuplicateSession")]
    DuplicateSession {
        /// The user whose session was replaced, as the client sent it.
        id: UserId,
        /// The evicted connection.
        #[serde(rename = "removedSessionId")]
        removed_session_id: ConnectionId,
    },

    /// Full roster of identified users, sensitive fields removed.
    #[serde(rename = "userUpdate")]
    UserUpdate {
        /// Filtered identities keyed by user ID.
        data: Roster,
    },
}

impl ServerEvent {
    /// Create a duplicate session event.
    #[must_use]
    pub fn duplicate_session(id: UserId, removed_session_id: ConnectionId) -> Self {
        Self::DuplicateSession {
            id,
            removed_session_id,
        }
    }

    /// Create a roster update event.
    #[must_use]
    pub fn user_update(data: Roster) -> Self {
        Self::UserUpdate { data }
    }

    /// Get the wire discriminant of this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DuplicateSession { .. } => "userDuplicateSession",
            Self::UserUpdate { .. } => "userUpdate",
        }
    }
}
