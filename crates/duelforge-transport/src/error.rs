use std::io;

/// Failure on a listener or a single connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Peer unreachable or already gone.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("could not write frame: {0}")]
    SendFailed(#[source] io::Error),

    #[error("could not read frame: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// Checked on both directions before any payload is buffered.
    #[error("frame of {len} bytes over the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Bind, accept or upgrade failed. Covers one attempt only.
    #[error("could not accept connection: {0}")]
    AcceptFailed(#[source] io::Error),
}
