//! Point-in-time health snapshot of a runtime.

use std::fmt;

use cadence_shared::{Origin, OwnerId, Tick};

use crate::scheduler::SequenceId;

/// Live sequences by state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceCounts {
    /// Executing right now.
    pub runnable: usize,
    /// Waiting on a condition.
    pub suspended: usize,
}

impl SequenceCounts {
    /// All live sequences.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.runnable + self.suspended
    }
}

/// A sequence suspended longer than the configured threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StuckSequence {
    /// The sequence.
    pub id: SequenceId,
    /// Its owner.
    pub owner: OwnerId,
    /// Ticks since it suspended.
    pub suspended_for: u64,
}

/// Snapshot returned by `Runtime::diagnostics`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostics {
    /// Current tick.
    pub tick: Tick,
    /// Registered owners.
    pub owners: usize,
    /// Enabled owners.
    pub enabled_owners: usize,
    /// Live subscriptions, interceptors and event waits included.
    pub subscriptions: usize,
    /// Live sequences.
    pub sequences: SequenceCounts,
    /// Sequences suspended for too long.
    pub stuck: Vec<StuckSequence>,
    /// Held messages per origin, indexed by [`Origin::index`].
    pub queued: [usize; 2],
    /// Handler, interceptor and sequence faults since start.
    pub faults: u64,
}

impl Diagnostics {
    /// Held messages of one origin.
    #[must_use]
    pub const fn queued(&self, origin: Origin) -> usize {
        self.queued[origin.index()]
    }

    /// Returns true if nothing looks stuck.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.stuck.is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} owners={}/{} subs={} seq={}({} suspended) stuck={} queued=in:{}/out:{} faults={}",
            self.tick,
            self.enabled_owners,
            self.owners,
            self.subscriptions,
            self.sequences.total(),
            self.sequences.suspended,
            self.stuck.len(),
            self.queued(Origin::Inbound),
            self.queued(Origin::Outbound),
            self.faults,
        )
    }
}
