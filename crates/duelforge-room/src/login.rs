//! The login room: where every new connection starts.

use duelforge_protocol::{
    ClientMessage, ConnectionId, IdentifyOutcome, ProtocolError, RoomKind, ServerMessage,
};
use duelforge_session::SessionError;
use tracing::{debug, warn};

use crate::{Members, Room, RoomContext};

/// Holds connections until they identify with an acceptable name.
///
/// Only `Identify` (plus `Leave` and heartbeat acks) is accepted here;
/// anything else is a protocol fault and disconnects the sender.
#[derive(Debug, Default)]
pub struct LoginRoom {
    members: Members,
}

impl LoginRoom {
    pub fn new() -> Self {
        Self::default()
    }

    fn identify(&mut self, id: ConnectionId, name: &str, ctx: &mut dyn RoomContext) {
        let now = ctx.now();
        let outcome = match ctx.registry().identify(id, name, now) {
            Ok(name) => IdentifyOutcome::Accepted { name },
            Err(SessionError::DuplicateName(_)) => IdentifyOutcome::DuplicateName,
            Err(SessionError::InvalidName(reason)) => IdentifyOutcome::InvalidName { reason },
            Err(e @ SessionError::NotFound(_)) => {
                warn!(conn_id = %id, error = %e, "identify without record");
                return;
            }
        };

        let accepted = matches!(outcome, IdentifyOutcome::Accepted { .. });
        if !ctx.send(id, &ServerMessage::IdentifyResult { outcome }) {
            self.remove_and_close(id, ctx);
            return;
        }
        if accepted && self.remove_member(id, ctx).is_ok() {
            ctx.enter_lobby(id);
        }
    }
}

impl Room for LoginRoom {
    fn kind(&self) -> RoomKind {
        RoomKind::Login
    }

    fn members(&self) -> &Members {
        &self.members
    }

    fn members_mut(&mut self) -> &mut Members {
        &mut self.members
    }

    fn on_join(&mut self, id: ConnectionId, ctx: &mut dyn RoomContext) {
        let now = ctx.now();
        ctx.registry().get_or_create(id, now);
        if !ctx.send(id, &ServerMessage::RoomJoined { room: RoomKind::Login }) {
            self.remove_and_close(id, ctx);
        }
    }

    fn dispatch(&mut self, sender: ConnectionId, message: ClientMessage, ctx: &mut dyn RoomContext) {
        match message {
            ClientMessage::Identify { name } => self.identify(sender, &name, ctx),
            ClientMessage::Leave => {
                debug!(conn_id = %sender, "left during login");
                self.remove_and_close(sender, ctx);
            }
            ClientMessage::HeartbeatAck => {}
            other @ (ClientMessage::SetReady { .. }
            | ClientMessage::Chat { .. }
            | ClientMessage::Click { .. }
            | ClientMessage::Concede) => {
                let fault = ProtocolError::unexpected(&other, RoomKind::Login);
                warn!(conn_id = %sender, error = %fault, "protocol fault, disconnecting");
                self.remove_and_close(sender, ctx);
            }
        }
    }
}
