//! Rooms for duelforge.
//!
//! A room groups connections that share a message-dispatch context. Every
//! room is ticked by the server loop and never touches a socket directly:
//! it reaches channels, the player registry and other rooms only through
//! the [`RoomContext`] it is handed for that tick.
//!
//! # Key types
//!
//! - [`Room`]: membership, supervision (heartbeats, liveness) and
//!   broadcast, shared by every room kind
//! - [`LoginRoom`], [`LobbyRoom`], [`MatchRoom`]: the three room kinds
//! - [`RoomHost`]: what the server must provide (channels, registry, clock)
//! - [`RoomManager`]: owns all rooms, ticks them in order and applies the
//!   transitions they request
//! - [`MatchPhase`]: the match state machine

mod config;
mod context;
mod error;
mod lobby;
mod login;
mod manager;
mod match_room;
mod members;
mod room;

pub use config::MatchConfig;
pub use context::{RoomCommand, RoomContext, RoomHost};
pub use error::RoomError;
pub use lobby::{CHAT_MAX_CHARS, LobbyRoom};
pub use login::LoginRoom;
pub use manager::RoomManager;
pub use match_room::{MatchId, MatchPhase, MatchRoom};
pub use members::Members;
pub use room::Room;
