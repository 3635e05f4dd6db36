//! Connections for duelforge.
//!
//! The server never sees sockets, only [`Connection`]s that move whole
//! frames. A frame is an opaque byte string; an empty one is a liveness
//! probe and is delivered like any other.
//!
//! | transport | framing |
//! |---|---|
//! | [`TcpTransport`] | 4-byte big-endian length, then the payload |
//! | `WebSocketTransport` | one binary message per frame |
//!
//! The `websocket` feature (on by default) pulls in `tokio-tungstenite`.

mod error;
mod id;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use id::ConnectionId;
pub use tcp::{DEFAULT_MAX_FRAME_LEN, TcpConnection, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{DEFAULT_HANDSHAKE_TIMEOUT, WebSocketConnection, WebSocketTransport};

use std::future::Future;
use std::io;
use std::net::SocketAddr;

/// A listener that hands out connections.
pub trait Transport: Send + 'static {
    type Connection: Connection;

    /// Next incoming connection. An `Err` concerns that one attempt only;
    /// callers keep accepting.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Frame-oriented duplex stream.
///
/// One task may sit in `recv` while another calls `send`; the two
/// directions never wait on each other.
pub trait Connection: Send + Sync + 'static {
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// `Ok(None)` once the peer has closed cleanly.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Shuts the write side; the peer sees a clean end of stream.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn id(&self) -> ConnectionId;
}
