//! # duelforge
//!
//! A real-time server for two-player shape duels.
//!
//! Clients connect, pick a display name in the login room, wait in the
//! lobby, and are paired into short best-of-three matches. One loop task
//! owns every room and runs them at a fixed tick rate; per-connection
//! reader and writer tasks keep socket I/O off that loop.
//!
//! ```rust,no_run
//! use duelforge::prelude::*;
//!
//! # async fn run() -> Result<(), DuelError> {
//! let server = ServerBuilder::new()
//!     .bind("0.0.0.0:7878")
//!     .build(BincodeCodec)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod server;

pub use config::ServerConfig;
pub use error::DuelError;
pub use server::{Server, ServerBuilder};

/// Everything needed to run a server or write a client.
pub mod prelude {
    pub use crate::{DuelError, Server, ServerBuilder, ServerConfig};
    pub use duelforge_protocol::{
        BincodeCodec, ChannelConfig, ClientMessage, Codec, IdentifyOutcome, JsonCodec,
        LeaveReason, MatchOutcome, MessageChannel, RoomKind, ServerMessage,
    };
    pub use duelforge_room::MatchConfig;
    pub use duelforge_session::HeartbeatConfig;
    pub use duelforge_tick::{TickConfig, TickPolicy};
    pub use duelforge_transport::{
        Connection, ConnectionId, TcpConnection, TcpTransport, Transport, WebSocketTransport,
    };
}
