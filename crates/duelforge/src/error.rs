//! Unified error type for the duelforge server.

use std::path::PathBuf;

use duelforge_protocol::{ChannelError, ProtocolError};
use duelforge_room::RoomError;
use duelforge_session::SessionError;
use duelforge_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// Connection-level faults never reach this type at run time; they are
/// handled inside the loop. In practice a running server only fails on
/// startup: a bad config file or a listener that cannot bind.
#[derive(Debug, thiserror::Error)]
pub enum DuelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// The config file could not be read.
    #[error("cannot read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`ServerConfig`](crate::ServerConfig).
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
