//! The capabilities a room is given for the duration of one tick.
//!
//! Rooms never hold a pointer to the server. The server implements
//! [`RoomHost`] over its channels and registry; the [`RoomManager`]
//! wraps that host in a [`RoomContext`] that also queues room
//! transitions, and applies them right after the requesting room's tick.
//!
//! [`RoomManager`]: crate::RoomManager

use std::collections::VecDeque;

use duelforge_protocol::{ChannelError, ClientMessage, ConnectionId, ServerMessage};
use duelforge_session::{HeartbeatConfig, PlayerRegistry};
use tokio::time::Instant;

/// What the server provides to rooms: the clock, the registry, and one
/// message channel per connection.
///
/// Every channel operation on an unknown (already closed) connection
/// reports failure instead of panicking.
pub trait RoomHost {
    /// The time this tick started.
    fn now(&self) -> Instant;

    fn heartbeat(&self) -> HeartbeatConfig;

    /// Most inbound messages handled per member in one tick. Anything
    /// beyond waits for the next tick.
    fn message_budget(&self) -> usize;

    fn registry(&mut self) -> &mut PlayerRegistry;

    /// Queues `message` for `to`. `false` means the channel is unusable.
    fn send(&mut self, to: ConnectionId, message: &ServerMessage) -> bool;

    /// Whether a complete inbound message is buffered for `id`.
    fn has_pending(&mut self, id: ConnectionId) -> bool;

    /// Takes one buffered inbound message without waiting.
    fn receive(&mut self, id: ConnectionId) -> Option<Result<ClientMessage, ChannelError>>;

    /// Whether the channel of `id` is still usable.
    fn is_live(&mut self, id: ConnectionId) -> bool;

    /// Closes and forgets the channel of `id`.
    fn close(&mut self, id: ConnectionId);
}

/// A transition a room asks for. Applied by the [`RoomManager`] after the
/// current room's tick, in request order.
///
/// [`RoomManager`]: crate::RoomManager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCommand {
    /// Place a connection (already removed from its current room) in the
    /// lobby.
    EnterLobby(ConnectionId),
    /// Create and start a match for two connections already removed from
    /// the lobby.
    CreateMatch([ConnectionId; 2]),
    /// Send a message to every lobby member.
    BroadcastToLobby(ServerMessage),
}

/// A [`RoomHost`] that can also request room transitions.
pub trait RoomContext: RoomHost {
    fn request(&mut self, command: RoomCommand);

    fn enter_lobby(&mut self, id: ConnectionId) {
        self.request(RoomCommand::EnterLobby(id));
    }

    fn create_match(&mut self, players: [ConnectionId; 2]) {
        self.request(RoomCommand::CreateMatch(players));
    }

    fn broadcast_to_lobby(&mut self, message: ServerMessage) {
        self.request(RoomCommand::BroadcastToLobby(message));
    }
}

/// A host plus the queue of requested transitions.
pub(crate) struct QueuedContext<'a> {
    host: &'a mut dyn RoomHost,
    queue: VecDeque<RoomCommand>,
}

impl<'a> QueuedContext<'a> {
    pub(crate) fn new(host: &'a mut dyn RoomHost) -> Self {
        Self {
            host,
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn next_command(&mut self) -> Option<RoomCommand> {
        self.queue.pop_front()
    }
}

impl RoomHost for QueuedContext<'_> {
    fn now(&self) -> Instant {
        self.host.now()
    }

    fn heartbeat(&self) -> HeartbeatConfig {
        self.host.heartbeat()
    }

    fn message_budget(&self) -> usize {
        self.host.message_budget()
    }

    fn registry(&mut self) -> &mut PlayerRegistry {
        self.host.registry()
    }

    fn send(&mut self, to: ConnectionId, message: &ServerMessage) -> bool {
        self.host.send(to, message)
    }

    fn has_pending(&mut self, id: ConnectionId) -> bool {
        self.host.has_pending(id)
    }

    fn receive(&mut self, id: ConnectionId) -> Option<Result<ClientMessage, ChannelError>> {
        self.host.receive(id)
    }

    fn is_live(&mut self, id: ConnectionId) -> bool {
        self.host.is_live(id)
    }

    fn close(&mut self, id: ConnectionId) {
        self.host.close(id);
    }
}

impl RoomContext for QueuedContext<'_> {
    fn request(&mut self, command: RoomCommand) {
        self.queue.push_back(command);
    }
}
