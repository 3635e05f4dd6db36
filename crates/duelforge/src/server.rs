//! `ServerBuilder` and the server loop.
//!
//! This ties the layers together: an acceptor task pulls connections off
//! the transport, and a single loop task owns every channel, the player
//! registry and all rooms.
//!
//! Each tick the loop:
//!
//! 1. admits connections queued by the acceptor into the login room,
//! 2. every `sweep_every_ticks` ticks, sweeps all rooms for dead channels
//!    and prunes the registry,
//! 3. ticks the login room, the lobby, reclaims finished matches and
//!    ticks the rest (see [`RoomManager::tick`]).

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use duelforge_protocol::{
    ChannelConfig, ChannelError, ClientMessage, Codec, ConnectionId, MessageChannel, ServerMessage,
};
use duelforge_room::{MatchConfig, RoomHost, RoomManager};
use duelforge_session::{HeartbeatConfig, PlayerRegistry};
use duelforge_tick::{TickPolicy, TickScheduler};
use duelforge_transport::{Connection, TcpTransport, Transport, WebSocketTransport};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{DuelError, ServerConfig};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a server.
///
/// # Example
///
/// ```rust,ignore
/// let server = ServerBuilder::new()
///     .bind("0.0.0.0:7878")
///     .tick_rate(30)
///     .build(BincodeCodec)
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// A builder with [`ServerConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn tick_rate(mut self, tick_rate_hz: u32) -> Self {
        self.config.tick.tick_rate_hz = tick_rate_hz;
        self
    }

    /// How the loop recovers from a slow tick.
    pub fn tick_policy(mut self, policy: TickPolicy) -> Self {
        self.config.tick.policy = policy;
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    pub fn matches(mut self, matches: MatchConfig) -> Self {
        self.config.matches = matches;
        self
    }

    /// Binds a length-prefixed TCP listener.
    ///
    /// # Errors
    /// [`DuelError::Transport`] if the address cannot be bound.
    pub async fn build<C: Codec>(self, codec: C) -> Result<Server<TcpTransport, C>, DuelError> {
        let transport = TcpTransport::bind(&self.config.bind_addr)
            .await?
            .with_max_frame_len(self.config.max_frame_len);
        Ok(self.with_transport(transport, codec))
    }

    /// Binds a WebSocket listener.
    ///
    /// # Errors
    /// [`DuelError::Transport`] if the address cannot be bound.
    pub async fn build_websocket<C: Codec>(
        self,
        codec: C,
    ) -> Result<Server<WebSocketTransport, C>, DuelError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        Ok(self.with_transport(transport, codec))
    }

    /// Uses an already-bound transport.
    pub fn with_transport<T: Transport, C: Codec>(self, transport: T, codec: C) -> Server<T, C> {
        Server {
            transport,
            codec,
            config: self.config,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound server. Call [`run`](Self::run) or
/// [`run_until`](Self::run_until) to start accepting connections.
pub struct Server<T: Transport, C: Codec> {
    transport: T,
    codec: C,
    config: ServerConfig,
}

impl<T: Transport, C: Codec> Server<T, C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs until the process is terminated.
    pub async fn run(self) -> Result<(), DuelError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until `shutdown` completes, then closes every channel.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), DuelError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            transport,
            codec,
            config,
        } = self;

        let (queue_tx, mut queue_rx) = mpsc::channel(config.accept_backlog.max(1));
        let acceptor = tokio::spawn(accept_loop(transport, queue_tx));

        let mut scheduler = TickScheduler::new(config.tick.clone());
        let mut state = ServerState::new(codec, &config);
        info!(
            tick_rate_hz = scheduler.tick_rate_hz(),
            policy = ?config.tick.policy,
            sweep_every_ticks = config.sweep_every_ticks,
            "server loop running"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                tick = scheduler.wait_for_tick() => {
                    state.tick(tick.tick, tick.now, &mut queue_rx);
                    scheduler.record_tick_end();
                }
            }
        }

        acceptor.abort();
        state.close_all();
        let metrics = scheduler.metrics();
        info!(
            ticks = metrics.ticks,
            late = metrics.late_ticks,
            over_budget = metrics.over_budget_ticks,
            max_work_ms = metrics.max_work.as_secs_f64() * 1000.0,
            "server stopped"
        );
        Ok(())
    }
}

/// Accepts connections and hands them to the loop without waiting on it.
async fn accept_loop<T: Transport>(mut transport: T, queue: mpsc::Sender<T::Connection>) {
    loop {
        match transport.accept().await {
            Ok(conn) => match queue.try_send(conn) {
                Ok(()) => {}
                Err(TrySendError::Full(conn)) => {
                    warn!(conn_id = %conn.id(), "accept backlog full, dropping connection");
                    if let Err(e) = conn.close().await {
                        debug!(conn_id = %conn.id(), error = %e, "close after backlog overflow failed");
                    }
                }
                Err(TrySendError::Closed(_)) => return,
            },
            Err(e) => {
                error!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

/// Everything the loop owns. Only the loop task touches it.
struct ServerState<C: Codec> {
    codec: C,
    channel_config: ChannelConfig,
    heartbeat: HeartbeatConfig,
    message_budget: usize,
    sweep_every_ticks: u64,
    channels: HashMap<ConnectionId, MessageChannel<C>>,
    registry: PlayerRegistry,
    rooms: RoomManager,
}

impl<C: Codec> ServerState<C> {
    fn new(codec: C, config: &ServerConfig) -> Self {
        Self {
            codec,
            channel_config: config.channel,
            heartbeat: config.heartbeat,
            message_budget: config.max_messages_per_tick,
            sweep_every_ticks: config.sweep_every_ticks,
            channels: HashMap::new(),
            registry: PlayerRegistry::new(),
            rooms: RoomManager::new(config.matches.clone()),
        }
    }

    fn tick<K: Connection>(&mut self, tick: u64, now: Instant, incoming: &mut mpsc::Receiver<K>) {
        while let Ok(conn) = incoming.try_recv() {
            self.admit(conn, now);
        }

        if self.sweep_every_ticks > 0 && tick % self.sweep_every_ticks == 0 {
            self.sweep(now);
        }

        let Self {
            heartbeat,
            message_budget,
            channels,
            registry,
            rooms,
            ..
        } = self;
        let mut host = LoopHost {
            now,
            heartbeat: *heartbeat,
            message_budget: *message_budget,
            channels,
            registry,
        };
        rooms.tick(&mut host);
    }

    fn admit<K: Connection>(&mut self, conn: K, now: Instant) {
        let channel = MessageChannel::open(conn, self.codec.clone(), self.channel_config);
        let id = channel.id();
        info!(conn_id = %id, "connection admitted");
        self.channels.insert(id, channel);

        let Self {
            heartbeat,
            message_budget,
            channels,
            registry,
            rooms,
            ..
        } = self;
        let mut host = LoopHost {
            now,
            heartbeat: *heartbeat,
            message_budget: *message_budget,
            channels,
            registry,
        };
        rooms.admit(id, &mut host);
    }

    /// Liveness sweep over every room, then the registry, then channels
    /// that no room holds any more.
    fn sweep(&mut self, now: Instant) {
        let Self {
            heartbeat,
            message_budget,
            channels,
            registry,
            rooms,
            ..
        } = self;
        let mut host = LoopHost {
            now,
            heartbeat: *heartbeat,
            message_budget: *message_budget,
            channels: &mut *channels,
            registry: &mut *registry,
        };
        rooms.sweep(&mut host);

        let pruned = registry.prune_dead(|id| channels.get_mut(&id).is_some_and(|ch| ch.is_live()));
        for id in pruned {
            if let Some(mut channel) = channels.remove(&id) {
                channel.close();
            }
        }

        channels.retain(|id, channel| {
            if rooms.room_of(*id).is_some() {
                return true;
            }
            debug!(conn_id = %id, "closing channel outside any room");
            channel.close();
            false
        });
    }

    fn close_all(&mut self) {
        for (_, mut channel) in self.channels.drain() {
            channel.close();
        }
    }
}

/// The loop's [`RoomHost`]: one tick's view of the channels and registry.
struct LoopHost<'a, C: Codec> {
    now: Instant,
    heartbeat: HeartbeatConfig,
    message_budget: usize,
    channels: &'a mut HashMap<ConnectionId, MessageChannel<C>>,
    registry: &'a mut PlayerRegistry,
}

impl<C: Codec> RoomHost for LoopHost<'_, C> {
    fn now(&self) -> Instant {
        self.now
    }

    fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    fn message_budget(&self) -> usize {
        self.message_budget
    }

    fn registry(&mut self) -> &mut PlayerRegistry {
        self.registry
    }

    fn send(&mut self, to: ConnectionId, message: &ServerMessage) -> bool {
        self.channels.get(&to).is_some_and(|ch| ch.send(message))
    }

    fn has_pending(&mut self, id: ConnectionId) -> bool {
        self.channels.get_mut(&id).is_some_and(|ch| ch.has_pending())
    }

    fn receive(&mut self, id: ConnectionId) -> Option<Result<ClientMessage, ChannelError>> {
        self.channels.get_mut(&id)?.try_receive()
    }

    fn is_live(&mut self, id: ConnectionId) -> bool {
        self.channels.get_mut(&id).is_some_and(|ch| ch.is_live())
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(mut channel) = self.channels.remove(&id) {
            channel.close();
        }
    }
}
