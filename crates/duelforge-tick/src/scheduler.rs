//! Fixed-rate pacing for the server loop, built on [`tokio::time::Interval`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{trace, warn};

/// How the loop recovers after a tick ran long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPolicy {
    /// Drop the grid points that passed while the loop was busy and wait
    /// for the next one. Timers inside rooms still see the real clock, so
    /// nothing is lost but loop iterations.
    #[default]
    Skip,
    /// Run the missed iterations back to back until the loop is on
    /// schedule again.
    CatchUp,
}

impl TickPolicy {
    fn missed_tick_behavior(self) -> MissedTickBehavior {
        match self {
            Self::Skip => MissedTickBehavior::Skip,
            Self::CatchUp => MissedTickBehavior::Burst,
        }
    }
}

/// Loop rate and budget settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Iterations per second, clamped to `1..=MAX_TICK_RATE_HZ`.
    pub tick_rate_hz: u32,
    pub policy: TickPolicy,
    /// Share of a period one iteration may spend working before a
    /// warning is logged.
    pub budget_warn_ratio: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            policy: TickPolicy::Skip,
            budget_warn_ratio: 0.8,
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Self::default()
        }
    }

    /// Brings every field into its supported range.
    pub fn validated(mut self) -> Self {
        let rate = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        if rate != self.tick_rate_hz {
            warn!(requested = self.tick_rate_hz, using = rate, "tick rate out of range");
            self.tick_rate_hz = rate;
        }
        if !self.budget_warn_ratio.is_finite() || self.budget_warn_ratio <= 0.0 {
            self.budget_warn_ratio = Self::default().budget_warn_ratio;
        }
        self
    }

    /// Length of one iteration: 50 ms at 20 Hz.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }
}

/// One loop iteration, as returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, Copy)]
pub struct TickInfo {
    /// Counts from 1.
    pub tick: u64,
    /// When the iteration actually started.
    pub now: Instant,
    /// How far past its grid point the iteration started.
    pub late_by: Duration,
    /// Whole periods that elapsed between the grid point and `now`.
    pub periods_behind: u64,
}

/// Totals since the scheduler was created.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub ticks: u64,
    /// Iterations that started more than a tenth of a period late.
    pub late_ticks: u64,
    /// Sum of `periods_behind` over all iterations.
    pub periods_missed: u64,
    /// Iterations whose work took longer than a full period.
    pub over_budget_ticks: u64,
    /// Work time of the last recorded iteration over the period.
    pub last_utilization: f64,
    /// Moving average of the work time, weighted 1/8 towards each new
    /// sample.
    pub avg_work: Duration,
    pub max_work: Duration,
}

/// Paces the server loop.
///
/// ```ignore
/// let info = scheduler.wait_for_tick().await;
/// state.tick(info.tick, info.now);
/// scheduler.record_tick_end();
/// ```
///
/// Must be created inside a tokio runtime.
pub struct TickScheduler {
    config: TickConfig,
    period: Duration,
    interval: Interval,
    ticks: u64,
    work_started: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// The first tick fires one period after creation.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.period();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(config.policy.missed_tick_behavior());
        Self {
            config,
            period,
            interval,
            ticks: 0,
            work_started: None,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits for the next grid point. Cancel-safe, so it can sit in a
    /// `select!` next to a shutdown signal.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let scheduled = self.interval.tick().await;
        let now = Instant::now();
        self.ticks += 1;
        self.work_started = Some(now);

        let late_by = now.saturating_duration_since(scheduled);
        let periods_behind = (late_by.as_nanos() / self.period.as_nanos()) as u64;

        self.metrics.ticks += 1;
        self.metrics.periods_missed += periods_behind;
        if late_by > self.period / 10 {
            self.metrics.late_ticks += 1;
            if periods_behind > 0 {
                warn!(
                    tick = self.ticks,
                    periods_behind,
                    late_ms = late_by.as_millis() as u64,
                    policy = ?self.config.policy,
                    "server loop fell behind"
                );
            }
        }
        trace!(tick = self.ticks, "tick");

        TickInfo {
            tick: self.ticks,
            now,
            late_by,
            periods_behind,
        }
    }

    /// Records how long the current iteration's work took. Does nothing
    /// unless called after [`wait_for_tick`](Self::wait_for_tick).
    pub fn record_tick_end(&mut self) {
        let Some(started) = self.work_started.take() else {
            return;
        };
        let work = started.elapsed();
        let utilization = work.as_secs_f64() / self.period.as_secs_f64();
        self.metrics.last_utilization = utilization;
        self.metrics.max_work = self.metrics.max_work.max(work);
        self.metrics.avg_work = (self.metrics.avg_work * 7 + work) / 8;

        if utilization > 1.0 {
            self.metrics.over_budget_ticks += 1;
            warn!(
                tick = self.ticks,
                work_ms = work.as_millis() as u64,
                "tick took longer than its period"
            );
        } else if utilization >= self.config.budget_warn_ratio {
            warn!(
                tick = self.ticks,
                utilization = format!("{:.0}%", utilization * 100.0),
                "tick close to its budget"
            );
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
