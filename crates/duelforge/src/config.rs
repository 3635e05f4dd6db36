//! Server configuration.

use std::path::Path;

use duelforge_protocol::ChannelConfig;
use duelforge_room::MatchConfig;
use duelforge_session::HeartbeatConfig;
use duelforge_tick::TickConfig;
use duelforge_transport::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

use crate::DuelError;

/// Everything the server loop needs to know.
///
/// Every field has a default, so a config file only lists what it
/// changes. Durations are written as `{ "secs": 3, "nanos": 0 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:7878`.
    pub bind_addr: String,

    /// Loop rate, catch-up policy and budget warning threshold.
    pub tick: TickConfig,

    /// Run the liveness sweep and registry prune every this many ticks.
    /// Zero disables the sweep.
    pub sweep_every_ticks: u64,

    /// Accepted connections waiting for the loop beyond this are dropped.
    pub accept_backlog: usize,

    /// Largest inbound frame on the TCP transport.
    pub max_frame_len: usize,

    /// Inbound messages handled per connection per tick. The rest wait
    /// in the channel's queue.
    pub max_messages_per_tick: usize,

    pub channel: ChannelConfig,

    pub heartbeat: HeartbeatConfig,

    pub matches: MatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7878".to_string(),
            tick: TickConfig::default(),
            sweep_every_ticks: 20,
            accept_backlog: 64,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_messages_per_tick: 16,
            channel: ChannelConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            matches: MatchConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a config from a JSON file. Missing fields keep their defaults.
    ///
    /// # Errors
    /// [`DuelError::ConfigIo`] if the file cannot be read,
    /// [`DuelError::ConfigParse`] if it is not a valid config.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DuelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DuelError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| DuelError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}
