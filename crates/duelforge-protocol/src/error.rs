//! Error types for the protocol layer.
//!
//! Each crate in duelforge defines its own error enum. A `ProtocolError`
//! means the bytes were fine but their meaning was not; a `ChannelError`
//! means the channel itself can no longer be used.

use crate::{ClientMessage, RoomKind};

/// Errors produced while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(#[source] bincode::Error),

    /// Deserialization failed: truncated payload, unknown variant tag,
    /// or a frame carrying a different message kind.
    #[error("decode failed: {0}")]
    Decode(#[source] bincode::Error),

    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// JSON deserialization failed.
    #[cfg(feature = "json")]
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),

    /// The message decoded but is not acceptable in this context.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// A well-formed message the receiving room does not accept.
    pub fn unexpected(message: &ClientMessage, room: RoomKind) -> Self {
        Self::InvalidMessage(format!("{} not accepted in {room} room", message.kind()))
    }
}

/// Errors surfaced by [`MessageChannel`](crate::MessageChannel).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A transport or protocol fault was recorded earlier; the channel is
    /// permanently unusable.
    #[error("channel faulted")]
    Faulted,

    /// The peer closed the connection and no buffered frames remain.
    #[error("channel closed by peer")]
    Closed,

    /// A frame could not be decoded. The channel is faulted as a result.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
