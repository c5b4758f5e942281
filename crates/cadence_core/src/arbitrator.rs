//! # Output Arbitration
//!
//! Many sequences may want to steer the same single-owner output in one
//! tick. [`OutputArbitrator`] collects their requests and resolves exactly
//! one winner per tick; [`OutputConsumer`] applies the winner and decides
//! what happens on ticks nobody asked for anything.
//!
//! ```text
//! submit(owner A, p=10) ─┐
//! submit(owner B, p=40) ─┼─> resolve() ─> B ─> consumer.apply() ─> Set(B)
//! submit(owner C, p=40) ─┘          (ties: latest submission wins -> C)
//! ```

use cadence_shared::{OwnerId, Priority, Tick};
use tracing::trace;

/// One request for the output.
#[derive(Clone, Debug, PartialEq)]
pub struct ArbitrationRequest<T> {
    /// Requested value.
    pub value: T,
    /// Request priority, higher wins.
    pub priority: Priority,
    /// Requesting module.
    pub owner: OwnerId,
    /// Tick of submission.
    pub submitted_at: Tick,
    order: u64,
}

/// Per-tick arbitration of one shared output.
#[derive(Debug)]
pub struct OutputArbitrator<T> {
    requests: Vec<ArbitrationRequest<T>>,
    next_order: u64,
    ticks_since_resolution: u32,
}

impl<T> OutputArbitrator<T> {
    /// Creates an arbitrator with no pending request.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requests: Vec::new(),
            next_order: 0,
            ticks_since_resolution: 0,
        }
    }

    /// Stores a request, replacing the owner's earlier one for this tick.
    pub fn submit(&mut self, owner: OwnerId, value: T, priority: Priority, tick: Tick) {
        self.requests.retain(|request| request.owner != owner);
        let order = self.next_order;
        self.next_order += 1;
        self.requests.push(ArbitrationRequest {
            value,
            priority,
            owner,
            submitted_at: tick,
            order,
        });
    }

    /// Drops the owner's pending request. Returns true if there was one.
    pub fn withdraw(&mut self, owner: OwnerId) -> bool {
        let before = self.requests.len();
        self.requests.retain(|request| request.owner != owner);
        self.requests.len() != before
    }

    /// Picks the highest-priority request, the latest one among equals, and
    /// clears the request set.
    pub fn resolve(&mut self) -> Option<ArbitrationRequest<T>> {
        let winner = self
            .requests
            .iter()
            .enumerate()
            .max_by_key(|(_, request)| (request.priority, request.order))
            .map(|(index, _)| index);

        let resolved = winner.map(|index| self.requests.swap_remove(index));
        self.requests.clear();

        match &resolved {
            Some(request) => {
                self.ticks_since_resolution = 0;
                trace!(owner = %request.owner, priority = %request.priority, "arbitration winner");
            }
            None => {
                self.ticks_since_resolution = self.ticks_since_resolution.saturating_add(1);
            }
        }
        resolved
    }

    /// Consecutive resolutions without any request.
    #[must_use]
    pub const fn ticks_since_resolution(&self) -> u32 {
        self.ticks_since_resolution
    }

    /// Number of pending requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.requests.len()
    }
}

impl<T> Default for OutputArbitrator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a consumer does on ticks without a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Keep the last value forever.
    Sticky,
    /// Go back to neutral after this many ticks without a request.
    ResetAfter(u32),
}

impl ResetPolicy {
    /// `0` means sticky.
    #[must_use]
    pub const fn from_ticks(ticks: u32) -> Self {
        if ticks == 0 {
            Self::Sticky
        } else {
            Self::ResetAfter(ticks)
        }
    }
}

/// Effect of one [`OutputConsumer::apply`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutputChange<T> {
    /// A new value was applied.
    Set(T),
    /// Nothing changed.
    Unchanged,
    /// The output went back to neutral.
    Reset,
}

/// Applies arbitration results to the output, once per tick.
#[derive(Debug)]
pub struct OutputConsumer<T> {
    policy: ResetPolicy,
    current: Option<T>,
}

impl<T: Clone> OutputConsumer<T> {
    /// Creates a neutral consumer.
    #[must_use]
    pub const fn new(policy: ResetPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    /// Applies this tick's resolution. `idle` is the arbitrator's
    /// [`OutputArbitrator::ticks_since_resolution`].
    pub fn apply(&mut self, resolved: Option<T>, idle: u32) -> OutputChange<T> {
        if let Some(value) = resolved {
            self.current = Some(value.clone());
            return OutputChange::Set(value);
        }
        match self.policy {
            ResetPolicy::ResetAfter(limit) if self.current.is_some() && idle >= limit => {
                self.current = None;
                OutputChange::Reset
            }
            _ => OutputChange::Unchanged,
        }
    }

    /// The applied value, `None` while neutral.
    #[must_use]
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> ResetPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_priority_then_latest() {
        let mut arbitrator = OutputArbitrator::new();
        arbitrator.submit(OwnerId(0), 'A', Priority(1), Tick(1));
        arbitrator.submit(OwnerId(1), 'B', Priority(5), Tick(1));
        arbitrator.submit(OwnerId(2), 'C', Priority(5), Tick(1));

        let winner = arbitrator.resolve().unwrap();
        assert_eq!(winner.value, 'C');
        assert_eq!(winner.owner, OwnerId(2));
        assert_eq!(arbitrator.pending(), 0);
    }

    #[test]
    fn test_resubmit_supersedes() {
        let mut arbitrator = OutputArbitrator::new();
        arbitrator.submit(OwnerId(0), 1, Priority(50), Tick(1));
        arbitrator.submit(OwnerId(1), 2, Priority(10), Tick(1));
        arbitrator.submit(OwnerId(0), 3, Priority(5), Tick(1));

        assert_eq!(arbitrator.pending(), 2);
        assert_eq!(arbitrator.resolve().map(|r| r.value), Some(2));
    }

    #[test]
    fn test_resolve_empty_counts_idle_ticks() {
        let mut arbitrator = OutputArbitrator::<u8>::new();
        assert!(arbitrator.resolve().is_none());
        assert!(arbitrator.resolve().is_none());
        assert_eq!(arbitrator.ticks_since_resolution(), 2);

        arbitrator.submit(OwnerId(0), 7, Priority::NORMAL, Tick(3));
        arbitrator.resolve();
        assert_eq!(arbitrator.ticks_since_resolution(), 0);
    }

    #[test]
    fn test_withdraw() {
        let mut arbitrator = OutputArbitrator::new();
        arbitrator.submit(OwnerId(4), "x", Priority::NORMAL, Tick(1));
        assert!(arbitrator.withdraw(OwnerId(4)));
        assert!(!arbitrator.withdraw(OwnerId(4)));
        assert!(arbitrator.resolve().is_none());
    }

    #[test]
    fn test_sticky_consumer_keeps_value() {
        let mut consumer = OutputConsumer::new(ResetPolicy::Sticky);
        assert_eq!(consumer.apply(Some(3), 0), OutputChange::Set(3));
        assert_eq!(consumer.apply(None, 100), OutputChange::Unchanged);
        assert_eq!(consumer.current(), Some(&3));
    }

    #[test]
    fn test_consumer_resets_after_timeout() {
        let mut arbitrator = OutputArbitrator::new();
        let mut consumer = OutputConsumer::new(ResetPolicy::from_ticks(2));

        arbitrator.submit(OwnerId(0), 9, Priority::NORMAL, Tick(1));
        let resolved = arbitrator.resolve().map(|r| r.value);
        assert_eq!(consumer.apply(resolved, arbitrator.ticks_since_resolution()), OutputChange::Set(9));

        let resolved = arbitrator.resolve().map(|r| r.value);
        assert_eq!(consumer.apply(resolved, arbitrator.ticks_since_resolution()), OutputChange::Unchanged);

        let resolved = arbitrator.resolve().map(|r| r.value);
        assert_eq!(consumer.apply(resolved, arbitrator.ticks_since_resolution()), OutputChange::Reset);
        assert_eq!(consumer.current(), None);

        let resolved = arbitrator.resolve().map(|r| r.value);
        assert_eq!(consumer.apply(resolved, arbitrator.ticks_since_resolution()), OutputChange::Unchanged);
    }
}
