//! Every message kind that travels on the wire.
//!
//! Both directions are closed enums. Serde encodes the variant index as an
//! implicit type tag, then each field in declaration order, so reordering
//! variants or fields is a wire-breaking change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of cells on the match board. Cells are numbered `0..BOARD_CELLS`.
pub const BOARD_CELLS: u8 = 9;

/// Number of target shapes. Shapes are numbered `1..=SHAPES`.
pub const SHAPES: u8 = 2;

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// Which kind of room a connection has just entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomKind {
    /// Waiting for an `Identify` request.
    Login,
    /// Identified, waiting to be paired.
    Lobby,
    /// Playing a match.
    Match,
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Lobby => write!(f, "lobby"),
            Self::Match => write!(f, "match"),
        }
    }
}

/// The answer to an identification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifyOutcome {
    /// The name was accepted (as normalized by the server).
    Accepted { name: String },
    /// Another live connection already uses this name. Try again.
    DuplicateName,
    /// The name is empty, too long, or contains control characters.
    InvalidName { reason: String },
}

/// How a finished match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// The player in this slot (1 or 2) won.
    Winner(u8),
    /// Both slots ended with equal scores.
    Tie,
}

/// Why a participant left a running match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveReason {
    Disconnected,
    Conceded,
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Choose a display name. Only accepted in the login room.
    Identify { name: String },

    /// Toggle readiness in the lobby.
    SetReady { ready: bool },

    /// Say something to the current room.
    Chat { text: String },

    /// Reply to a [`ServerMessage::Heartbeat`] probe.
    HeartbeatAck,

    /// Claim the current round by clicking a board cell.
    Click { cell: u8 },

    /// Give up the current match.
    Concede,

    /// Disconnect gracefully.
    Leave,
}

impl ClientMessage {
    /// Variant name, for logs and protocol errors. Never includes the
    /// payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "Identify",
            Self::SetReady { .. } => "SetReady",
            Self::Chat { .. } => "Chat",
            Self::HeartbeatAck => "HeartbeatAck",
            Self::Click { .. } => "Click",
            Self::Concede => "Concede",
            Self::Leave => "Leave",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Messages the server may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Response to [`ClientMessage::Identify`].
    IdentifyResult { outcome: IdentifyOutcome },

    /// The connection entered a room.
    RoomJoined { room: RoomKind },

    /// Lobby population changed.
    LobbyUpdate {
        member_count: u32,
        ready_count: u32,
        names: Vec<String>,
    },

    /// A relayed chat line.
    Chat { from: String, text: String },

    /// Liveness probe; answer with [`ClientMessage::HeartbeatAck`].
    Heartbeat,

    /// A match was created. `names[0]` is slot 1.
    MatchStart { names: Vec<String>, your_slot: u8 },

    /// A round is counting down. `positions[s - 1]` is the cell holding
    /// shape `s`; the round is claimed by clicking the cell of
    /// `target_shape` once the countdown elapses.
    RoundStart {
        round: u8,
        positions: [u8; 2],
        target_shape: u8,
        countdown_ms: u64,
    },

    /// A round resolved. `winner` is `None` when the round timed out.
    /// `outcome` is present only when `game_over` is set.
    RoundResult {
        round: u8,
        winner: Option<u8>,
        scores: [u8; 2],
        game_over: bool,
        outcome: Option<MatchOutcome>,
    },

    /// The opponent left; `winner` is the remaining player's slot.
    PlayerLeft {
        name: String,
        reason: LeaveReason,
        winner: u8,
    },

    /// Free-text summary of a finished match.
    GameOver { summary: String },

    /// The match is over and this connection is moving to the lobby.
    ReturningToLobby,
}
