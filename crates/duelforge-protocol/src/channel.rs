//! A typed, liveness-aware message channel over one connection.
//!
//! Each channel owns two background tasks:
//!
//! - a **reader** that pulls whole frames off the connection into a
//!   bounded queue, discarding zero-length probes but counting them as
//!   activity. When the queue is full the reader stops reading, so a peer
//!   that sends faster than the loop drains is held back by the transport
//!   instead of growing memory;
//! - a **writer** that drains an unbounded outbound queue onto the
//!   connection.
//!
//! The owner (the server loop) therefore never awaits socket I/O: `send`
//! only enqueues, `has_pending` and `try_receive` only look at the queue.
//! Faults observed by either task are recorded in shared flags and make the
//! channel permanently unusable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use duelforge_transport::{Connection, ConnectionId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{ChannelError, Codec};

/// Tuning for [`MessageChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// With no inbound traffic for this long, [`MessageChannel::is_live`]
    /// sends a zero-length probe frame. Also the minimum gap between two
    /// probes.
    pub stale_after: Duration,
    /// Decoded-but-unread frames buffered per connection. At least 1.
    pub inbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(15),
            inbound_capacity: 256,
        }
    }
}

/// State written by the background tasks and read by the owner.
struct Shared {
    opened_at: Instant,
    /// Milliseconds since `opened_at` of the last inbound frame.
    last_activity_ms: AtomicU64,
    faulted: AtomicBool,
    peer_closed: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            opened_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            faulted: AtomicBool::new(false),
            peer_closed: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        let elapsed = self.opened_at.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Release);
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = self.opened_at
            + Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire));
        now.saturating_duration_since(last)
    }

    /// Records a fault. Only the first one is logged.
    fn fault(&self, conn_id: ConnectionId, reason: &dyn std::fmt::Display) {
        if !self.faulted.swap(true, Ordering::AcqRel) {
            warn!(%conn_id, %reason, "channel faulted");
        }
    }

    fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }
}

/// A typed view over one connection.
///
/// Messages are encoded with the codec `C`. Outbound and inbound message
/// types are chosen per call, so the same channel type serves both the
/// server (`send::<ServerMessage>`, `receive::<ClientMessage>`) and test
/// clients (the reverse).
pub struct MessageChannel<C: Codec> {
    id: ConnectionId,
    codec: C,
    config: ChannelConfig,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    inbound: mpsc::Receiver<Vec<u8>>,
    /// A frame pulled off `inbound` by `has_pending` but not yet consumed.
    peeked: Option<Vec<u8>>,
    last_probe: Option<Instant>,
    reader: JoinHandle<()>,
}

impl<C: Codec> MessageChannel<C> {
    /// Wraps a connection and starts its reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<K: Connection>(conn: K, codec: C, config: ChannelConfig) -> Self {
        let id = conn.id();
        let conn = Arc::new(conn);
        let shared = Arc::new(Shared::new());
        let (in_tx, in_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(Arc::clone(&conn), Arc::clone(&shared), in_tx));
        tokio::spawn(write_loop(conn, Arc::clone(&shared), out_rx));

        debug!(conn_id = %id, "channel opened");
        Self {
            id,
            codec,
            config,
            shared,
            outbound: Some(out_tx),
            inbound: in_rx,
            peeked: None,
            last_probe: None,
            reader,
        }
    }

    /// The identity of the underlying connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Encodes `message` and queues it for the writer task.
    ///
    /// Returns `false` if the channel is faulted or closed, or the message
    /// could not be encoded. Delivery is not confirmed; a write failure
    /// surfaces later as a fault.
    pub fn send<M: Serialize>(&self, message: &M) -> bool {
        if self.shared.is_faulted() {
            return false;
        }
        match self.codec.encode(message) {
            Ok(bytes) => self.enqueue(bytes),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to encode outbound message");
                false
            }
        }
    }

    fn enqueue(&self, frame: Vec<u8>) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Returns `true` if a complete inbound frame is buffered.
    ///
    /// Never blocks. A faulted channel has nothing pending.
    pub fn has_pending(&mut self) -> bool {
        if self.shared.is_faulted() {
            return false;
        }
        if self.peeked.is_some() {
            return true;
        }
        match self.inbound.try_recv() {
            Ok(frame) => {
                self.peeked = Some(frame);
                true
            }
            Err(_) => false,
        }
    }

    /// Takes and decodes one buffered frame without waiting.
    ///
    /// Returns `None` if nothing is buffered. A frame that fails to decode
    /// faults the channel.
    pub fn try_receive<M: DeserializeOwned>(
        &mut self,
    ) -> Option<Result<M, ChannelError>> {
        if self.shared.is_faulted() {
            return Some(Err(ChannelError::Faulted));
        }
        if !self.has_pending() {
            return None;
        }
        self.peeked.take().map(|frame| self.decode(&frame))
    }

    /// Waits for one complete frame and decodes it.
    ///
    /// # Errors
    /// - [`ChannelError::Faulted`] if a fault was recorded.
    /// - [`ChannelError::Closed`] if the peer closed and nothing is left.
    /// - [`ChannelError::Protocol`] if the frame did not decode as `M`.
    pub async fn receive<M: DeserializeOwned>(&mut self) -> Result<M, ChannelError> {
        if self.shared.is_faulted() {
            return Err(ChannelError::Faulted);
        }
        if let Some(frame) = self.peeked.take() {
            return self.decode(&frame);
        }
        match self.inbound.recv().await {
            Some(frame) => self.decode(&frame),
            None if self.shared.is_faulted() => Err(ChannelError::Faulted),
            None => Err(ChannelError::Closed),
        }
    }

    fn decode<M: DeserializeOwned>(&self, frame: &[u8]) -> Result<M, ChannelError> {
        self.codec.decode(frame).map_err(|e| {
            self.shared.fault(self.id, &e);
            ChannelError::Protocol(e)
        })
    }

    /// Whether the channel is still usable.
    ///
    /// Cheap checks first: a recorded fault, a local close, or a peer that
    /// closed with nothing left buffered all mean dead. Otherwise, if the
    /// peer has been silent for `stale_after`, a zero-length probe is
    /// queued (at most once per `stale_after`). A probe that fails to write
    /// shows up as a fault on a later call.
    pub fn is_live(&mut self) -> bool {
        if self.shared.is_faulted() || self.outbound.is_none() {
            return false;
        }
        if self.shared.peer_closed.load(Ordering::Acquire) && !self.has_pending() {
            return false;
        }

        let now = Instant::now();
        let stale_after = self.config.stale_after;
        if self.shared.idle_for(now) >= stale_after {
            let probe_due = self
                .last_probe
                .is_none_or(|at| now.saturating_duration_since(at) >= stale_after);
            if probe_due {
                self.last_probe = Some(now);
                debug!(conn_id = %self.id, "probing idle connection");
                if !self.enqueue(Vec::new()) {
                    return false;
                }
            }
        }
        !self.shared.is_faulted()
    }

    /// Whether a fault has been recorded.
    pub fn is_faulted(&self) -> bool {
        self.shared.is_faulted()
    }

    /// Stops accepting outbound messages. Frames already queued are still
    /// written, then the connection is closed.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!(conn_id = %self.id, "channel closed");
        }
    }
}

impl<C: Codec> Drop for MessageChannel<C> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl<C: Codec> std::fmt::Debug for MessageChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("id", &self.id)
            .field("faulted", &self.shared.is_faulted())
            .field("closed", &self.outbound.is_none())
            .finish()
    }
}

async fn read_loop<K: Connection>(
    conn: Arc<K>,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<Vec<u8>>,
) {
    let conn_id = conn.id();
    loop {
        match conn.recv().await {
            Ok(Some(frame)) => {
                shared.touch();
                if frame.is_empty() {
                    continue;
                }
                if inbound.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(%conn_id, "peer closed connection");
                shared.peer_closed.store(true, Ordering::Release);
                break;
            }
            Err(e) => {
                shared.fault(conn_id, &e);
                break;
            }
        }
    }
}

async fn write_loop<K: Connection>(
    conn: Arc<K>,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let conn_id = conn.id();
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = conn.send(&frame).await {
            shared.fault(conn_id, &e);
            break;
        }
    }
    if let Err(e) = conn.close().await {
        debug!(%conn_id, error = %e, "close after writer exit failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BincodeCodec, ClientMessage, ServerMessage};
    use duelforge_transport::TransportError;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    /// In-memory connection: frames pushed into `incoming` are received,
    /// sent frames are collected in `sent`.
    struct MockConnection {
        id: ConnectionId,
        incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        sent: Arc<StdMutex<Vec<Vec<u8>>>>,
        fail_writes: Arc<AtomicBool>,
    }

    struct Harness {
        peer: mpsc::UnboundedSender<Vec<u8>>,
        sent: Arc<StdMutex<Vec<Vec<u8>>>>,
        fail_writes: Arc<AtomicBool>,
    }

    fn mock() -> (MockConnection, Harness) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let fail_writes = Arc::new(AtomicBool::new(false));
        let conn = MockConnection {
            id: ConnectionId::next(),
            incoming: Mutex::new(rx),
            sent: Arc::clone(&sent),
            fail_writes: Arc::clone(&fail_writes),
        };
        (conn, Harness { peer: tx, sent, fail_writes })
    }

    impl Connection for MockConnection {
        async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock write failure",
                )));
            }
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(self.incoming.lock().await.recv().await)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.id
        }
    }

    fn config() -> ChannelConfig {
        ChannelConfig::default()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn probes(h: &Harness) -> usize {
        h.sent.lock().unwrap().iter().filter(|f| f.is_empty()).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_is_sent_only_after_stale_interval() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(conn, BincodeCodec, config());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(ch.is_live());
        settle().await;
        assert_eq!(probes(&h), 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ch.is_live());
        settle().await;
        assert_eq!(probes(&h), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_is_rate_limited() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(conn, BincodeCodec, config());

        tokio::time::advance(Duration::from_secs(16)).await;
        for _ in 0..20 {
            assert!(ch.is_live());
        }
        settle().await;
        assert_eq!(probes(&h), 1);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(ch.is_live());
        settle().await;
        assert_eq!(probes(&h), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_probe_counts_as_activity_but_is_not_delivered() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(conn, BincodeCodec, config());

        tokio::time::advance(Duration::from_secs(14)).await;
        h.peer.send(Vec::new()).unwrap();
        settle().await;
        assert!(!ch.has_pending());

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(ch.is_live());
        settle().await;
        assert_eq!(probes(&h), 0, "peer was active 14s ago");
    }

    #[tokio::test]
    async fn test_failed_probe_write_faults_channel() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(
            conn,
            BincodeCodec,
            ChannelConfig {
                stale_after: Duration::ZERO,
                ..config()
            },
        );
        h.fail_writes.store(true, Ordering::SeqCst);

        assert!(ch.is_live(), "fault is not known until the writer runs");
        settle().await;
        assert!(!ch.is_live());
        assert!(ch.is_faulted());
        assert!(!ch.send(&ServerMessage::Heartbeat));
    }

    #[tokio::test]
    async fn test_peer_close_is_dead_only_after_buffer_drains() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(conn, BincodeCodec, config());

        let frame = BincodeCodec.encode(&ClientMessage::Leave).unwrap();
        h.peer.send(frame).unwrap();
        drop(h.peer);
        settle().await;

        assert!(ch.is_live(), "one frame is still buffered");
        let msg: ClientMessage = ch.try_receive().unwrap().unwrap();
        assert_eq!(msg, ClientMessage::Leave);
        assert!(!ch.is_live());
    }

    #[tokio::test]
    async fn test_undecodable_frame_faults_channel() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(conn, BincodeCodec, config());

        h.peer.send(vec![0xff, 0xff]).unwrap();
        settle().await;

        assert!(ch.has_pending());
        let result = ch.try_receive::<ClientMessage>().unwrap();
        assert!(matches!(result, Err(ChannelError::Protocol(_))));
        assert!(!ch.is_live());
        assert!(!ch.has_pending());
    }

    #[tokio::test]
    async fn test_try_receive_is_none_when_idle() {
        let (conn, _h) = mock();
        let mut ch = MessageChannel::open(conn, BincodeCodec, config());
        assert!(!ch.has_pending());
        assert!(ch.try_receive::<ClientMessage>().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(conn, BincodeCodec, config());

        assert!(ch.send(&ServerMessage::Heartbeat));
        ch.close();
        assert!(!ch.send(&ServerMessage::Heartbeat));
        assert!(!ch.is_live());
        settle().await;
        assert_eq!(h.sent.lock().unwrap().len(), 1, "queued frame was flushed");
    }
    #[tokio::test]
    async fn test_full_inbound_queue_holds_reader_back() {
        let (conn, h) = mock();
        let mut ch = MessageChannel::open(
            conn,
            BincodeCodec,
            ChannelConfig {
                inbound_capacity: 4,
                ..config()
            },
        );
        let chat = BincodeCodec
            .encode(&ClientMessage::Chat { text: "spam".into() })
            .unwrap();
        for _ in 0..10 {
            h.peer.send(chat.clone()).unwrap();
        }

        let mut batches = Vec::new();
        for _ in 0..3 {
            settle().await;
            let mut drained = 0;
            while let Some(msg) = ch.try_receive::<ClientMessage>() {
                assert!(msg.is_ok());
                drained += 1;
            }
            batches.push(drained);
        }
        assert_eq!(batches, vec![4, 4, 2], "nothing lost, never more than the cap");
        assert!(ch.is_live());
    }
}
