//! The `Room` trait: behavior shared by every room kind.

use duelforge_protocol::{ClientMessage, ConnectionId, RoomKind, ServerMessage};
use duelforge_session::HeartbeatCheck;
use tracing::{debug, info, warn};

use crate::{Members, RoomContext, RoomError};

/// A container of connections with its own message handling.
///
/// Implementors provide membership storage and the hooks; the provided
/// methods implement joining, leaving, broadcasting and the supervisory
/// tick the same way for every room.
///
/// Every pass that may remove members iterates a snapshot taken at the
/// start of the pass and skips identities that have left since.
pub trait Room {
    fn kind(&self) -> RoomKind;

    fn members(&self) -> &Members;

    fn members_mut(&mut self) -> &mut Members;

    /// Called after `id` was added.
    fn on_join(&mut self, _id: ConnectionId, _ctx: &mut dyn RoomContext) {}

    /// Called after `id` was removed, whatever the reason.
    fn on_leave(&mut self, _id: ConnectionId, _ctx: &mut dyn RoomContext) {}

    /// Handles one decoded message from a member. `HeartbeatAck` is
    /// recorded before dispatch and never reaches this method.
    fn dispatch(&mut self, sender: ConnectionId, message: ClientMessage, ctx: &mut dyn RoomContext);

    /// Room-specific work, run after inbound messages and supervision.
    fn on_tick(&mut self, _ctx: &mut dyn RoomContext) {}

    /// Adds `id` and runs [`on_join`](Self::on_join).
    ///
    /// # Errors
    /// Returns [`RoomError::AlreadyMember`] if `id` is already present.
    fn add_member(&mut self, id: ConnectionId, ctx: &mut dyn RoomContext) -> Result<(), RoomError> {
        if !self.members_mut().insert(id) {
            return Err(RoomError::AlreadyMember(id, self.kind()));
        }
        debug!(conn_id = %id, room = %self.kind(), members = self.members().len(), "member joined");
        self.on_join(id, ctx);
        Ok(())
    }

    /// Removes `id` and runs [`on_leave`](Self::on_leave).
    ///
    /// # Errors
    /// Returns [`RoomError::NotMember`] if `id` is not present.
    fn remove_member(&mut self, id: ConnectionId, ctx: &mut dyn RoomContext) -> Result<(), RoomError> {
        if !self.members_mut().remove(id) {
            return Err(RoomError::NotMember(id, self.kind()));
        }
        debug!(conn_id = %id, room = %self.kind(), members = self.members().len(), "member left");
        self.on_leave(id, ctx);
        Ok(())
    }

    /// The single teardown path for a faulted or departing connection:
    /// leave the room, drop the registry record, close the channel.
    fn remove_and_close(&mut self, id: ConnectionId, ctx: &mut dyn RoomContext) {
        if self.remove_member(id, ctx).is_ok() {
            info!(conn_id = %id, room = %self.kind(), "connection removed");
        }
        ctx.registry().remove(id);
        ctx.close(id);
    }

    /// Sends `message` to every member. A member whose send fails is torn
    /// down; delivery to the rest continues.
    fn broadcast(&mut self, message: &ServerMessage, ctx: &mut dyn RoomContext) {
        for id in self.members().snapshot() {
            if !self.members().contains(id) {
                continue;
            }
            if !ctx.send(id, message) {
                self.remove_and_close(id, ctx);
            }
        }
    }

    /// One supervisory tick: drain inbound messages, supervise liveness,
    /// then run [`on_tick`](Self::on_tick).
    ///
    /// Messages are drained first so an acknowledgment that arrived since
    /// the last tick counts before its heartbeat is judged.
    fn tick(&mut self, ctx: &mut dyn RoomContext) {
        self.pump(ctx);
        self.supervise(ctx);
        self.on_tick(ctx);
    }

    /// Dispatches buffered inbound messages member by member, at most
    /// [`message_budget`](crate::RoomHost::message_budget) per member.
    fn pump(&mut self, ctx: &mut dyn RoomContext) {
        let budget = ctx.message_budget().max(1);
        for id in self.members().snapshot() {
            let mut handled = 0;
            while self.members().contains(id) && ctx.has_pending(id) {
                if handled == budget {
                    debug!(conn_id = %id, room = %self.kind(), budget, "message budget spent, rest deferred");
                    break;
                }
                handled += 1;
                match ctx.receive(id) {
                    Some(Ok(ClientMessage::HeartbeatAck)) => {
                        let now = ctx.now();
                        if let Err(e) = ctx.registry().acknowledge(id, now) {
                            debug!(conn_id = %id, error = %e, "ack without record");
                        }
                    }
                    Some(Ok(message)) => self.dispatch(id, message, ctx),
                    Some(Err(e)) => {
                        warn!(conn_id = %id, room = %self.kind(), error = %e, "undecodable message");
                        self.remove_and_close(id, ctx);
                    }
                    None => break,
                }
            }
        }
    }

    /// Heartbeat and liveness supervision.
    ///
    /// Probes members that have been quiet for the heartbeat interval,
    /// and tears down members whose probe timed out or whose channel is no
    /// longer live.
    fn supervise(&mut self, ctx: &mut dyn RoomContext) {
        let now = ctx.now();
        let heartbeat = ctx.heartbeat();
        for id in self.members().snapshot() {
            if !self.members().contains(id) {
                continue;
            }
            let faulted = match ctx.registry().check_heartbeat(id, now, &heartbeat) {
                HeartbeatCheck::Healthy => false,
                HeartbeatCheck::ProbeDue => {
                    if ctx.send(id, &ServerMessage::Heartbeat) {
                        if let Err(e) = ctx.registry().mark_probe_sent(id, now) {
                            debug!(conn_id = %id, error = %e, "probe sent without record");
                        }
                        false
                    } else {
                        true
                    }
                }
                HeartbeatCheck::Expired => {
                    info!(conn_id = %id, room = %self.kind(), "heartbeat timed out");
                    true
                }
            };
            if faulted || !ctx.is_live(id) {
                self.remove_and_close(id, ctx);
            }
        }
    }

    /// Liveness-only pass run periodically by the server loop.
    fn sweep(&mut self, ctx: &mut dyn RoomContext) {
        for id in self.members().snapshot() {
            if self.members().contains(id) && !ctx.is_live(id) {
                self.remove_and_close(id, ctx);
            }
        }
    }
}
