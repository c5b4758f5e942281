//! # Fixed-Timestep Loop
//!
//! Paces [`ClientSession::step`](crate::ClientSession::step) at the client
//! tick rate (20Hz unless configured otherwise).
//!
//! ```text
//! loop {
//!     while tick_loop.is_due() {
//!         let started = tick_loop.begin();
//!         session.step()?;
//!         tick_loop.finish(started);
//!     }
//!     tick_loop.sleep_until_due();
//! }
//! ```

use std::time::{Duration, Instant};

use cadence_shared::TICKS_PER_SECOND;

/// Below this remaining time the loop spins instead of sleeping.
const SPIN_THRESHOLD: Duration = Duration::from_micros(1000);

/// Step timing statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest step observed.
    pub min: Duration,
    /// Longest step observed.
    pub max: Duration,
    /// Exponential moving average of step durations.
    pub average: Duration,
    /// Steps that overran the tick budget.
    pub late: u64,
    /// Steps measured.
    pub measured: u64,
}

impl TickStats {
    fn record(&mut self, elapsed: Duration, budget: Duration) {
        if self.measured == 0 {
            self.min = elapsed;
            self.average = elapsed;
        } else {
            self.min = self.min.min(elapsed);
            self.average = (self.average * 15 + elapsed) / 16;
        }
        self.max = self.max.max(elapsed);
        self.measured += 1;
        if elapsed > budget {
            self.late += 1;
        }
    }
}

/// Fixed-timestep pacing with an accumulator, so a slow step is caught up
/// by running the following steps back to back.
#[derive(Debug)]
pub struct TickLoop {
    budget: Duration,
    last_poll: Instant,
    accumulated: Duration,
    started: u64,
    stats: TickStats,
}

impl TickLoop {
    /// Loop running `tick_rate` steps per second. A rate of 0 is treated as 1.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let budget = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            budget,
            last_poll: Instant::now(),
            accumulated: Duration::ZERO,
            started: 0,
            stats: TickStats::default(),
        }
    }

    /// True when at least one step is owed.
    pub fn is_due(&mut self) -> bool {
        let now = Instant::now();
        self.accumulated += now.duration_since(self.last_poll);
        self.last_poll = now;
        self.accumulated >= self.budget
    }

    /// Consumes one owed step and returns its start time.
    #[must_use]
    pub fn begin(&mut self) -> Instant {
        self.accumulated = self.accumulated.saturating_sub(self.budget);
        self.started += 1;
        Instant::now()
    }

    /// Records the duration of a step started with [`TickLoop::begin`].
    pub fn finish(&mut self, started: Instant) {
        self.stats.record(started.elapsed(), self.budget);
    }

    /// Blocks the calling thread until the next step is owed.
    pub fn sleep_until_due(&self) {
        let owed_at = self.last_poll + self.budget.saturating_sub(self.accumulated);
        let remaining = owed_at.saturating_duration_since(Instant::now());
        if remaining > SPIN_THRESHOLD {
            std::thread::sleep(remaining - SPIN_THRESHOLD / 2);
        }
        while Instant::now() < owed_at {
            std::hint::spin_loop();
        }
    }

    /// Steps started so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.started
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target duration of one step.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(TICKS_PER_SECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_from_rate() {
        assert_eq!(TickLoop::default().budget(), Duration::from_millis(50));
        assert_eq!(TickLoop::new(0).budget(), Duration::from_secs(1));
    }

    #[test]
    fn test_not_due_immediately() {
        let mut tick_loop = TickLoop::new(1);
        assert!(!tick_loop.is_due());
    }

    #[test]
    fn test_due_after_sleep() {
        let mut tick_loop = TickLoop::new(1000);
        tick_loop.sleep_until_due();
        assert!(tick_loop.is_due());
        let started = tick_loop.begin();
        tick_loop.finish(started);
        assert_eq!(tick_loop.steps(), 1);
        assert_eq!(tick_loop.stats().measured, 1);
    }

    #[test]
    fn test_stats_track_extremes() {
        let budget = Duration::from_millis(10);
        let mut stats = TickStats::default();
        stats.record(Duration::from_millis(4), budget);
        stats.record(Duration::from_millis(12), budget);
        stats.record(Duration::from_millis(2), budget);

        assert_eq!(stats.min, Duration::from_millis(2));
        assert_eq!(stats.max, Duration::from_millis(12));
        assert_eq!(stats.late, 1);
        assert_eq!(stats.measured, 3);
    }
}
