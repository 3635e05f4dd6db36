//! Timekeeping for duelforge.
//!
//! Two pieces, both driven from the single server loop:
//!
//! - [`TickScheduler`] paces the loop at a fixed rate (20 Hz by default),
//!   either skips or replays grid points missed during a slow tick, and
//!   warns when a tick eats most of its period.
//! - [`TimerQueue`] holds due events (round countdowns, return-to-lobby
//!   delays). Rooms drain it from inside their own tick, so timed state
//!   changes run on the same task as message handling instead of racing
//!   it from a separate callback.
//!
//! # Integration
//!
//! ```ignore
//! let mut scheduler = TickScheduler::with_rate(20);
//! loop {
//!     tokio::select! {
//!         _ = &mut shutdown => break,
//!         info = scheduler.wait_for_tick() => {
//!             state.tick(info.tick, info.now);
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```

mod scheduler;
mod timer;

pub use scheduler::{TickConfig, TickInfo, TickMetrics, TickPolicy, TickScheduler};
pub use timer::{TimerHandle, TimerQueue};
