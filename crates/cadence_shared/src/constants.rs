//! # Timing Constants
//!
//! The remote server simulates at a fixed rate. Every duration in the core is
//! expressed in ticks of that rate.

/// Simulation steps per second of the remote server.
pub const TICKS_PER_SECOND: u32 = 20;

/// Duration of one simulation step in microseconds (20Hz = 50,000 μs).
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / TICKS_PER_SECOND as u64;

/// Converts whole seconds to ticks at the server rate.
#[must_use]
pub const fn seconds_to_ticks(seconds: u32) -> u32 {
    seconds * TICKS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_duration() {
        assert_eq!(TICK_DURATION_MICROS, 50_000);
        assert_eq!(seconds_to_ticks(3), 60);
    }
}
