//! Frames as WebSocket binary messages.
//!
//! The message boundary is the frame boundary, so nothing is prefixed.
//! An empty binary message is a probe, same as a zero-length TCP frame.
//! Text messages are accepted and handed up as their UTF-8 bytes, which
//! lets browser clients speaking the JSON codec send either kind.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// How long a freshly accepted socket gets to finish the upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type Upgraded = WebSocketStream<TcpStream>;

fn io_error(kind: io::ErrorKind, e: tungstenite::Error) -> io::Error {
    io::Error::new(kind, e)
}

/// Listens for HTTP upgrade requests and yields [`WebSocketConnection`]s.
pub struct WebSocketTransport {
    listener: TcpListener,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        info!(addr, "websocket listener bound");
        Ok(Self {
            listener,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Caps the upgrade. A client that stalls past it is dropped and
    /// `accept` reports the failure instead of waiting forever.
    pub fn with_handshake_timeout(mut self, limit: Duration) -> Self {
        self.handshake_timeout = limit;
        self
    }

    async fn upgrade(&self, socket: TcpStream) -> Result<Upgraded, TransportError> {
        match tokio::time::timeout(
            self.handshake_timeout,
            tokio_tungstenite::accept_async(socket),
        )
        .await
        {
            Ok(Ok(ws)) => Ok(ws),
            Ok(Err(e)) => Err(TransportError::AcceptFailed(io_error(
                io::ErrorKind::InvalidData,
                e,
            ))),
            Err(_) => Err(TransportError::AcceptFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                "websocket handshake timed out",
            ))),
        }
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        let (socket, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        if let Err(e) = socket.set_nodelay(true) {
            debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }

        let (outgoing, incoming) = self.upgrade(socket).await?.split();
        let id = ConnectionId::next();
        debug!(conn_id = %id, %peer, "websocket upgraded");

        Ok(WebSocketConnection {
            id,
            outgoing: Mutex::new(outgoing),
            incoming: Mutex::new(incoming),
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// One upgraded socket. Each direction has its own lock, so a reader
/// parked in `recv` never delays a `send`.
pub struct WebSocketConnection {
    id: ConnectionId,
    outgoing: Mutex<SplitSink<Upgraded, Message>>,
    incoming: Mutex<SplitStream<Upgraded>>,
}

impl WebSocketConnection {
    async fn write(&self, message: Message) -> Result<(), TransportError> {
        self.outgoing
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(io_error(io::ErrorKind::BrokenPipe, e)))
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.write(Message::Binary(data.to_vec().into())).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut incoming = self.incoming.lock().await;
        while let Some(next) = incoming.next().await {
            let message = next.map_err(|e| {
                TransportError::ReceiveFailed(io_error(io::ErrorKind::ConnectionReset, e))
            })?;
            match message {
                Message::Binary(bytes) => return Ok(Some(bytes.to_vec())),
                Message::Text(text) => return Ok(Some(text.as_bytes().to_vec())),
                Message::Close(_) => return Ok(None),
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut outgoing = self.outgoing.lock().await;
        match outgoing.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(io_error(
                io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
