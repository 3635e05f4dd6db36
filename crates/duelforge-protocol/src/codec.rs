//! Codec trait and implementations for message payloads.
//!
//! A codec turns a message into the payload of one frame and back. The
//! channel doesn't care which one is in use, so a debugging session can
//! swap the compact binary format for JSON without touching rooms.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to frame payloads and decodes them back.
///
/// `Clone` because every channel owns its own copy; codecs are expected
/// to be zero-sized or cheap.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a decode error if the bytes are malformed, incomplete, or
    /// describe a different message kind.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// The default wire codec.
///
/// Bincode writes fields in declaration order with no field names or
/// schema, and tags enum variants by index. Encoder and decoder therefore
/// agree only if they share the exact same type definitions; a frame that
/// decodes to leftover bytes is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

/// Little-endian, fixed-width integers, no trailing garbage.
fn bincode_options() -> impl bincode::Options {
    use bincode::Options;
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        use bincode::Options;
        bincode_options()
            .serialize(value)
            .map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        use bincode::Options;
        bincode_options()
            .deserialize(data)
            .map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A human-readable [`Codec`] for debugging with generic tools.
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ```rust
/// use duelforge_protocol::{Codec, JsonCodec, ServerMessage};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&ServerMessage::Heartbeat).unwrap();
/// let decoded: ServerMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, ServerMessage::Heartbeat);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::JsonEncode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::JsonDecode)
    }
}
