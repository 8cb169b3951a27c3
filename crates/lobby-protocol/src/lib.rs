//! # lobby-protocol
//!
//! Wire protocol definitions for the Lobby presence hub.
//!
//! Clients speak JSON over a WebSocket. This crate defines the identifiers,
//! the identity record, the inbound and outbound message shapes, and the codec
//! that turns raw frames into typed messages.
//!
//! ## Messages
//!
//! - Inbound: `{"userId": ...}` identifies the sending connection
//! - `userDuplicateSession` - an older session for a user was evicted
//! - `userUpdate` - the full roster of identified users
//!
//! ## Example
//!
//! ```rust
//! use lobby_protocol::{codec, ClientMessage, UserId};
//!
//! let message = codec::decode(br#"{"userId": 7}"#).unwrap();
//! assert_eq!(message, ClientMessage::Identify { user_id: UserId::from("7") });
//! ```

pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{decode, encode, encode_with_limit, ProtocolError, MAX_EVENT_SIZE};
pub use messages::{ClientMessage, Roster, ServerEvent};
pub use types::{ConnectionId, Identity, UserId};
