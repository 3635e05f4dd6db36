//! Player bookkeeping for duelforge.
//!
//! This crate owns the per-connection metadata the rooms need but the
//! channel doesn't know about:
//!
//! 1. **Identity**: the display name chosen in the login room, validated
//!    and checked for duplicates ([`PlayerRegistry::identify`])
//! 2. **Heartbeat state**: when the last probe/ack happened and whether a
//!    probe is outstanding ([`PlayerRegistry::check_heartbeat`])
//! 3. **Pruning**: dropping records whose channels died without the
//!    owning room noticing ([`PlayerRegistry::prune_dead`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← asks the registry for names and heartbeat status
//!     ↕
//! Session Layer (this crate)  ← one PlayerRecord per live ConnectionId
//!     ↕
//! Protocol Layer (below)  ← provides ConnectionId
//! ```

mod error;
mod name;
mod record;
mod registry;

pub use error::SessionError;
pub use name::{MAX_NAME_CHARS, validate_name};
pub use record::{HeartbeatCheck, HeartbeatConfig, PlayerRecord};
pub use registry::PlayerRegistry;
