//! Error types for the room layer.

use duelforge_protocol::{ConnectionId, RoomKind};

/// Errors that can occur during room operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The connection is already a member of this room.
    #[error("{0} already in {1} room")]
    AlreadyMember(ConnectionId, RoomKind),

    /// The connection is not a member of this room.
    #[error("{0} not in {1} room")]
    NotMember(ConnectionId, RoomKind),
}
