//! Codec for decoding client frames and encoding hub events.
//!
//! Every frame is a single JSON document; WebSocket framing already delimits
//! messages so no length prefix is used.

use bytes::Bytes;
use thiserror::Error;

use crate::messages::{ClientMessage, ServerEvent};

/// Maximum inbound frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default maximum outbound event size (64 MiB).
///
/// Rosters grow with the number of identified users, so events get a far
/// larger ceiling than client frames. This matches the default message limit
/// of common WebSocket clients.
pub const MAX_EVENT_SIZE: usize = 64 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not valid JSON.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Encoded event exceeds the outbound limit.
    #[error("Event size {size} exceeds maximum {limit}")]
    EventTooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Limit that was applied.
        limit: usize,
    },

    /// Event could not be serialized.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decode a client frame.
///
/// Valid JSON that is not a recognised message decodes to
/// [`ClientMessage::Unrecognized`] rather than an error.
///
/// # Errors
///
/// Returns an error if the frame is too large or not valid JSON.
pub fn decode(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let value = serde_json::from_slice(data).map_err(ProtocolError::Decode)?;
    Ok(ClientMessage::from_value(value))
}

/// Encode an event to bytes, allowing up to [`MAX_EVENT_SIZE`].
///
/// # Errors
///
/// Returns an error if the event is too large or serialization fails.
pub fn encode(event: &ServerEvent) -> Result<Bytes, ProtocolError> {
    encode_with_limit(event, MAX_EVENT_SIZE)
}

/// Encode an event to bytes with an explicit size limit.
///
/// # Errors
///
/// Returns an error if the encoded event is larger than `limit` or
/// serialization fails.
pub fn encode_with_limit(event: &ServerEvent, limit: usize) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(event).map_err(ProtocolError::Encode)?;

    if payload.len() > limit {
        return Err(ProtocolError::EventTooLarge {
            size: payload.len(),
            limit,
        });
    }

    Ok(Bytes::from(payload))
}

/// Decode an event, as a client would.
///
/// # Errors
///
/// Returns an error if the data is too large or not a known event.
pub fn decode_event(data: &[u8]) -> Result<ServerEvent, ProtocolError> {
    if data.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge {
            size: data.len(),
            limit: MAX_EVENT_SIZE,
        });
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}
