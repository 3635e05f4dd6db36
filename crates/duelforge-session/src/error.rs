//! Error types for the session layer.

use duelforge_protocol::ConnectionId;

/// Errors that can occur while managing player records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Another connection already uses this name (compared
    /// case-insensitively). The client may try again.
    #[error("name {0:?} is already taken")]
    DuplicateName(String),

    /// The requested name failed validation.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// No record exists for the connection. Records are removed on
    /// teardown, so this usually means the connection is already gone.
    #[error("no player record for {0}")]
    NotFound(ConnectionId),
}
