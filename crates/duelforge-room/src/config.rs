//! Match timing and scoring.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for every [`MatchRoom`](crate::MatchRoom).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Pause between match creation and the first round.
    pub start_delay: Duration,

    /// How long a round's targets are shown before clicks count.
    pub countdown: Duration,

    /// How long an active round waits for a correct click.
    pub round_timeout: Duration,

    /// Pause between a resolved round and the next countdown.
    pub next_round_delay: Duration,

    /// Pause between the end of a match and the return to the lobby.
    pub return_delay: Duration,

    /// Score that ends the match early.
    pub win_score: u8,

    /// Rounds played at most.
    pub max_rounds: u8,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(1),
            countdown: Duration::from_secs(3),
            round_timeout: Duration::from_secs(5),
            next_round_delay: Duration::from_secs(2),
            return_delay: Duration::from_secs(3),
            win_score: 2,
            max_rounds: 3,
        }
    }
}
