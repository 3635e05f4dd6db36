//! Wire protocol for duelforge.
//!
//! This crate defines what clients and the server say to each other and
//! how it travels:
//!
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]): closed enums,
//!   one variant per message kind. The variant index is the type tag.
//! - **Codec** ([`Codec`] trait, [`BincodeCodec`], `JsonCodec`): how
//!   those messages become frame payloads.
//! - **Channel** ([`MessageChannel`]): a typed, liveness-aware wrapper
//!   around one transport connection.
//!
//! ```text
//! Transport (frames) → Protocol (typed messages) → Rooms
//! ```

mod channel;
mod codec;
mod error;
mod messages;

pub use channel::{ChannelConfig, MessageChannel};
pub use codec::{BincodeCodec, Codec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use duelforge_transport::ConnectionId;
pub use error::{ChannelError, ProtocolError};
pub use messages::{
    BOARD_CELLS, ClientMessage, IdentifyOutcome, LeaveReason, MatchOutcome,
    RoomKind, SHAPES, ServerMessage,
};
