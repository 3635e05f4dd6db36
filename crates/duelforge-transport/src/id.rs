use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ISSUED: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle for one connection. Never reused, so a stale id
/// held by a room can't alias a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw value. Transports should use [`ConnectionId::next`].
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn next() -> Self {
        Self(ISSUED.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
