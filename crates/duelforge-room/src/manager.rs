//! Room manager: owns every room, ticks them in order, and applies the
//! transitions they request.

use duelforge_protocol::{ConnectionId, RoomKind};
use tracing::{info, warn};

use crate::context::QueuedContext;
use crate::{
    LobbyRoom, LoginRoom, MatchConfig, MatchId, MatchRoom, Room, RoomCommand, RoomHost,
};

/// The login room, the lobby, and every live match.
///
/// A connection is a member of at most one room at any time: moves always
/// remove first and add when the queued transition is applied.
#[derive(Debug)]
pub struct RoomManager {
    login: LoginRoom,
    lobby: LobbyRoom,
    matches: Vec<MatchRoom>,
    match_config: MatchConfig,
    next_match_id: u64,
}

impl RoomManager {
    pub fn new(match_config: MatchConfig) -> Self {
        Self {
            login: LoginRoom::new(),
            lobby: LobbyRoom::new(),
            matches: Vec::new(),
            match_config,
            next_match_id: 1,
        }
    }

    pub fn login(&self) -> &LoginRoom {
        &self.login
    }

    pub fn lobby(&self) -> &LobbyRoom {
        &self.lobby
    }

    pub fn matches(&self) -> &[MatchRoom] {
        &self.matches
    }

    /// Which room `id` is in, if any.
    pub fn room_of(&self, id: ConnectionId) -> Option<RoomKind> {
        if self.login.members().contains(id) {
            Some(RoomKind::Login)
        } else if self.lobby.members().contains(id) {
            Some(RoomKind::Lobby)
        } else if self.matches.iter().any(|m| m.members().contains(id)) {
            Some(RoomKind::Match)
        } else {
            None
        }
    }

    /// How many rooms list `id` as a member.
    pub fn membership_count(&self, id: ConnectionId) -> usize {
        usize::from(self.login.members().contains(id))
            + usize::from(self.lobby.members().contains(id))
            + self.matches.iter().filter(|m| m.members().contains(id)).count()
    }

    /// Places a newly accepted connection in the login room.
    pub fn admit(&mut self, id: ConnectionId, host: &mut dyn RoomHost) {
        let mut ctx = QueuedContext::new(host);
        if let Err(e) = self.login.add_member(id, &mut ctx) {
            warn!(conn_id = %id, error = %e, "admit failed");
        }
        self.apply(&mut ctx);
    }

    /// Liveness sweep over every room.
    pub fn sweep(&mut self, host: &mut dyn RoomHost) {
        let mut ctx = QueuedContext::new(host);
        self.login.sweep(&mut ctx);
        self.apply(&mut ctx);
        self.lobby.sweep(&mut ctx);
        self.apply(&mut ctx);
        for index in 0..self.matches.len() {
            self.matches[index].sweep(&mut ctx);
            self.apply(&mut ctx);
        }
    }

    /// One loop iteration for all rooms: login, lobby, reclaim finished
    /// matches, then the remaining matches. Transitions requested by a room
    /// are applied right after that room's tick.
    pub fn tick(&mut self, host: &mut dyn RoomHost) {
        let mut ctx = QueuedContext::new(host);

        self.login.tick(&mut ctx);
        self.apply(&mut ctx);

        self.lobby.tick(&mut ctx);
        self.apply(&mut ctx);

        self.reclaim();

        for index in 0..self.matches.len() {
            self.matches[index].tick(&mut ctx);
            self.apply(&mut ctx);
        }
    }

    fn reclaim(&mut self) {
        self.matches.retain(|m| {
            if m.is_reclaimable() {
                info!(match_id = %m.id(), "match reclaimed");
                false
            } else {
                true
            }
        });
    }

    fn apply(&mut self, ctx: &mut QueuedContext<'_>) {
        while let Some(command) = ctx.next_command() {
            match command {
                RoomCommand::EnterLobby(id) => {
                    if let Err(e) = self.lobby.add_member(id, ctx) {
                        warn!(conn_id = %id, error = %e, "enter lobby failed");
                    }
                }
                RoomCommand::CreateMatch(players) => {
                    let id = MatchId::new(self.next_match_id);
                    self.next_match_id += 1;
                    let mut room = MatchRoom::new(id, players, self.match_config.clone());
                    room.start(ctx);
                    self.matches.push(room);
                }
                RoomCommand::BroadcastToLobby(message) => {
                    self.lobby.broadcast(&message, ctx);
                }
            }
        }
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}
