//! The lobby: identified players waiting to be paired.

use std::collections::HashSet;

use duelforge_protocol::{ClientMessage, ConnectionId, RoomKind, ServerMessage};
use tracing::{debug, info};

use crate::{Members, Room, RoomContext};

/// Chat lines longer than this many characters are cut.
pub const CHAT_MAX_CHARS: usize = 200;

/// Identified players, their readiness, and lobby chat.
///
/// Every tick, the first two ready members (in join order) are paired
/// into a new match.
#[derive(Debug, Default)]
pub struct LobbyRoom {
    members: Members,
    ready: HashSet<ConnectionId>,
}

impl LobbyRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, id: ConnectionId) -> bool {
        self.ready.contains(&id)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    fn send_update(&mut self, ctx: &mut dyn RoomContext) {
        let names = self
            .members
            .iter()
            .map(|id| ctx.registry().name(id).unwrap_or("?").to_owned())
            .collect();
        let update = ServerMessage::LobbyUpdate {
            member_count: self.members.len() as u32,
            ready_count: self.ready.len() as u32,
            names,
        };
        self.broadcast(&update, ctx);
    }

    fn set_ready(&mut self, id: ConnectionId, ready: bool, ctx: &mut dyn RoomContext) {
        let changed = if ready {
            self.ready.insert(id)
        } else {
            self.ready.remove(&id)
        };
        if changed {
            debug!(conn_id = %id, ready, "readiness changed");
            self.send_update(ctx);
        }
    }

    fn ready_in_join_order(&self) -> Vec<ConnectionId> {
        self.members.iter().filter(|id| self.ready.contains(id)).collect()
    }

    /// Moves ready pairs out of the lobby and into new matches.
    ///
    /// Both players get a liveness check first. If neither passes, no
    /// match is created and both stay in the lobby with readiness cleared.
    /// If only one fails, the match is still created; it ends at once when
    /// the dead player is dropped.
    fn pair_ready(&mut self, ctx: &mut dyn RoomContext) {
        loop {
            let ready = self.ready_in_join_order();
            let [a, b] = match ready.as_slice() {
                [a, b, ..] => [*a, *b],
                _ => return,
            };

            self.ready.remove(&a);
            self.ready.remove(&b);

            let a_live = ctx.is_live(a);
            let b_live = ctx.is_live(b);
            if !a_live && !b_live {
                info!(conn_a = %a, conn_b = %b, "pairing skipped, neither player reachable");
                self.send_update(ctx);
                continue;
            }

            for id in [a, b] {
                if let Err(e) = self.remove_member(id, ctx) {
                    debug!(conn_id = %id, error = %e, "paired player already gone from lobby");
                }
            }
            info!(conn_a = %a, conn_b = %b, "players paired");
            ctx.create_match([a, b]);
        }
    }
}

impl Room for LobbyRoom {
    fn kind(&self) -> RoomKind {
        RoomKind::Lobby
    }

    fn members(&self) -> &Members {
        &self.members
    }

    fn members_mut(&mut self) -> &mut Members {
        &mut self.members
    }

    fn on_join(&mut self, id: ConnectionId, ctx: &mut dyn RoomContext) {
        if !ctx.send(id, &ServerMessage::RoomJoined { room: RoomKind::Lobby }) {
            self.remove_and_close(id, ctx);
            return;
        }
        self.send_update(ctx);
    }

    fn on_leave(&mut self, id: ConnectionId, ctx: &mut dyn RoomContext) {
        self.ready.remove(&id);
        self.send_update(ctx);
    }

    fn dispatch(&mut self, sender: ConnectionId, message: ClientMessage, ctx: &mut dyn RoomContext) {
        match message {
            ClientMessage::SetReady { ready } => self.set_ready(sender, ready, ctx),
            ClientMessage::Chat { text } => {
                let from = ctx.registry().name(sender).unwrap_or("?").to_owned();
                let text = text.chars().take(CHAT_MAX_CHARS).collect();
                self.broadcast(&ServerMessage::Chat { from, text }, ctx);
            }
            ClientMessage::Leave => self.remove_and_close(sender, ctx),
            ClientMessage::HeartbeatAck => {}
            // Late match input or a repeated login; harmless.
            ClientMessage::Identify { .. } | ClientMessage::Click { .. } | ClientMessage::Concede => {
                debug!(conn_id = %sender, "ignoring message in lobby");
            }
        }
    }

    fn on_tick(&mut self, ctx: &mut dyn RoomContext) {
        self.pair_ready(ctx);
    }
}
