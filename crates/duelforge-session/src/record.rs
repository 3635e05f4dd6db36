//! Per-connection metadata and heartbeat settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// HeartbeatConfig
// ---------------------------------------------------------------------------

/// Timing for the application-level heartbeat.
///
/// Rooms probe a member whose last heartbeat exchange is older than
/// `interval`, and give up on it once a probe has gone unanswered for
/// longer than `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Quiet period before a probe is sent. Default: 3 seconds.
    pub interval: Duration,

    /// How long a probe may stay unanswered. Default: 5 seconds.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// HeartbeatCheck
// ---------------------------------------------------------------------------

/// What a room should do about one member's heartbeat this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatCheck {
    /// Nothing to do: recently heard from, or a probe is outstanding but
    /// still within the timeout.
    Healthy,

    /// Send a probe and call
    /// [`mark_probe_sent`](crate::PlayerRegistry::mark_probe_sent).
    ProbeDue,

    /// The outstanding probe timed out. The member must be removed.
    Expired,
}

// ---------------------------------------------------------------------------
// PlayerRecord
// ---------------------------------------------------------------------------

/// Everything the server remembers about one connection.
///
/// Created lazily the first time a connection is looked up and removed
/// when the connection is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Display name, set once identification succeeds.
    pub name: Option<String>,

    /// When the last heartbeat probe was sent or acknowledged.
    pub last_heartbeat: Instant,

    /// A probe was sent and no acknowledgment has arrived yet.
    pub heartbeat_pending: bool,
}

impl PlayerRecord {
    /// A fresh, unnamed record whose heartbeat clock starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            name: None,
            last_heartbeat: now,
            heartbeat_pending: false,
        }
    }

    /// Classifies the heartbeat state at `now`.
    pub fn check(&self, now: Instant, config: &HeartbeatConfig) -> HeartbeatCheck {
        let since = now.saturating_duration_since(self.last_heartbeat);
        if self.heartbeat_pending {
            if since > config.timeout {
                HeartbeatCheck::Expired
            } else {
                HeartbeatCheck::Healthy
            }
        } else if since >= config.interval {
            HeartbeatCheck::ProbeDue
        } else {
            HeartbeatCheck::Healthy
        }
    }
}
