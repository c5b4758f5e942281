//! # Sequence Scheduler
//!
//! Drives every live [`Sequence`]. `AfterTicks` and `Until` waits are checked
//! once per tick by [`SequenceScheduler::poll`], after the tick event was
//! published, in owner-registration order. `OnEvent` waits park a temporary
//! subscription on the bus and resume inside the publish that matches.
//!
//! ## Guarantees
//!
//! - A wait installed during tick `t` is first checked on tick `t + 1`.
//! - A sequence is never entered twice at the same time.
//! - A cancelled sequence never runs again; its teardown runs exactly once,
//!   outside every scheduler lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cadence_shared::{OwnerId, Tick};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::bus::{SubscriptionHandle, SubscriptionSpec};
use crate::diagnostics::{SequenceCounts, StuckSequence};
use crate::error::{CoreError, CoreResult};
use crate::event::Event;
use crate::runtime::Runtime;
use crate::sequence::{
    Condition, Predicate, Probe, Sequence, SequenceContext, Step, Teardown, TeardownUpdate, Wake,
};

/// Unique id of a sequence, increasing with start order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceId(pub u64);

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}", self.0)
    }
}

/// Lifecycle state of a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SequenceState {
    /// Executing right now.
    Runnable,
    /// Waiting on a condition.
    Suspended,
    /// Returned normally.
    Completed,
    /// Cancelled by its owner, by a fault or explicitly.
    Cancelled,
}

impl SequenceState {
    /// Returns true for `Completed` and `Cancelled`.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

enum Pending {
    Ticks(u32),
    Until(Predicate),
    Event {
        subscription: SubscriptionHandle,
        timeout: u32,
    },
}

/// Runs once after a sequence completed or was cancelled.
pub(crate) type Finish = Box<dyn FnOnce(&Runtime) + Send>;

struct Control {
    state: SequenceState,
    running: bool,
    cancel_requested: bool,
    pending: Option<Pending>,
    since: Tick,
    on_cancel: Option<Teardown>,
    on_finish: Option<Finish>,
    stuck_reported: bool,
}

pub(crate) struct SequenceCell {
    id: SequenceId,
    owner: OwnerId,
    body: Mutex<Option<Box<dyn Sequence>>>,
    control: Mutex<Control>,
}

impl SequenceCell {
    fn key(&self) -> (OwnerId, SequenceId) {
        (self.owner, self.id)
    }
}

/// Handle to a started sequence.
#[derive(Clone)]
pub struct SequenceHandle {
    pub(crate) cell: Arc<SequenceCell>,
}

impl SequenceHandle {
    /// Id of the sequence.
    #[must_use]
    pub fn id(&self) -> SequenceId {
        self.cell.id
    }

    /// Owner of the sequence.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.cell.owner
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SequenceState {
        self.cell.control.lock().state
    }

    /// Returns true until the sequence completed or was cancelled.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.state().is_finished()
    }
}

impl fmt::Debug for SequenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceHandle")
            .field("id", &self.cell.id)
            .field("owner", &self.cell.owner)
            .field("state", &self.state())
            .finish()
    }
}

/// Cooperative scheduler for multi-tick sequences.
pub struct SequenceScheduler {
    entries: Mutex<BTreeMap<(OwnerId, SequenceId), Arc<SequenceCell>>>,
    next_id: AtomicU64,
    stuck_after: u64,
    faults: AtomicU64,
}

impl SequenceScheduler {
    /// Creates a scheduler. Suspensions older than `stuck_after` ticks are
    /// reported as stuck; `0` disables the report.
    #[must_use]
    pub fn new(stuck_after: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            stuck_after,
            faults: AtomicU64::new(0),
        }
    }

    /// Creates a sequence and runs it right away. `on_finish` runs after it
    /// completed or was cancelled, after any teardown.
    pub(crate) fn start(
        &self,
        rt: &Runtime,
        owner: OwnerId,
        body: Box<dyn Sequence>,
        event: Option<&mut Event>,
        on_finish: Option<Finish>,
    ) -> SequenceHandle {
        let id = SequenceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cell = Arc::new(SequenceCell {
            id,
            owner,
            body: Mutex::new(Some(body)),
            control: Mutex::new(Control {
                state: SequenceState::Runnable,
                running: false,
                cancel_requested: false,
                pending: None,
                since: rt.tick(),
                on_cancel: None,
                on_finish,
                stuck_reported: false,
            }),
        });
        self.entries.lock().insert(cell.key(), Arc::clone(&cell));
        debug!(sequence = %id, %owner, "sequence started");

        self.run(rt, &cell, Wake::Start, event);
        SequenceHandle { cell }
    }

    /// Checks every tick-driven wait once. Returns how many sequences resumed.
    pub(crate) fn poll(&self, rt: &Runtime, now: Tick) -> usize {
        let snapshot: Vec<_> = self.entries.lock().values().cloned().collect();
        snapshot
            .iter()
            .filter(|cell| self.poll_one(rt, cell, now))
            .count()
    }

    fn poll_one(&self, rt: &Runtime, cell: &Arc<SequenceCell>, now: Tick) -> bool {
        let mut control = cell.control.lock();
        if control.state != SequenceState::Suspended || control.running || control.since >= now {
            return false;
        }
        let elapsed = now.since(control.since);
        if self.stuck_after > 0 && elapsed >= self.stuck_after && !control.stuck_reported {
            control.stuck_reported = true;
            warn!(sequence = %cell.id, owner = %cell.owner, elapsed, "sequence looks stuck");
        }

        match control.pending.take() {
            Some(Pending::Ticks(count)) if elapsed >= u64::from(count) => {
                drop(control);
                self.run(rt, cell, Wake::Ticks { elapsed }, None);
                true
            }
            Some(Pending::Until(mut predicate)) => {
                control.running = true;
                drop(control);

                let ready = predicate(&Probe {
                    runtime: rt,
                    tick: now,
                    elapsed,
                });

                let mut control = cell.control.lock();
                control.running = false;
                if control.cancel_requested {
                    drop(control);
                    self.finish_cancelled(rt, cell);
                    return false;
                }
                if !ready {
                    control.pending = Some(Pending::Until(predicate));
                    return false;
                }
                drop(control);
                self.run(rt, cell, Wake::Condition { elapsed }, None);
                true
            }
            Some(Pending::Event {
                subscription,
                timeout,
            }) if timeout > 0 && elapsed >= u64::from(timeout) => {
                drop(control);
                rt.bus().unsubscribe(subscription);
                trace!(sequence = %cell.id, "event wait timed out");
                self.run(rt, cell, Wake::TimedOut, None);
                true
            }
            other => {
                control.pending = other;
                false
            }
        }
    }

    /// Resumes a sequence parked on an `OnEvent` wait.
    fn wake_on_event(&self, rt: &Runtime, cell: &Arc<SequenceCell>, event: &mut Event) {
        let subscription = {
            let mut control = cell.control.lock();
            if control.state != SequenceState::Suspended || control.running {
                return;
            }
            match control.pending.take() {
                Some(Pending::Event { subscription, .. }) => subscription,
                other => {
                    control.pending = other;
                    return;
                }
            }
        };
        rt.bus().unsubscribe(subscription);
        self.run(rt, cell, Wake::Event, Some(event));
    }

    fn run(
        &self,
        rt: &Runtime,
        cell: &Arc<SequenceCell>,
        mut wake: Wake,
        mut event: Option<&mut Event>,
    ) {
        {
            let mut control = cell.control.lock();
            if control.state.is_finished() || control.running {
                return;
            }
            control.running = true;
            control.state = SequenceState::Runnable;
            control.pending = None;
        }
        let Some(mut body) = cell.body.lock().take() else {
            cell.control.lock().running = false;
            return;
        };

        loop {
            let mut cx = SequenceContext::new(rt, cell.id, cell.owner, wake, event.as_deref_mut());
            let result = body.resume(&mut cx);
            let teardown = cx.into_teardown();

            let mut control = cell.control.lock();
            match teardown {
                TeardownUpdate::Keep => {}
                TeardownUpdate::Set(teardown) => control.on_cancel = Some(teardown),
                TeardownUpdate::Clear => control.on_cancel = None,
            }
            if control.cancel_requested {
                control.running = false;
                drop(control);
                drop(body);
                self.finish_cancelled(rt, cell);
                return;
            }

            match result {
                Ok(Step::Done) => {
                    control.state = SequenceState::Completed;
                    control.running = false;
                    control.on_cancel = None;
                    let on_finish = control.on_finish.take();
                    drop(control);
                    self.entries.lock().remove(&cell.key());
                    debug!(sequence = %cell.id, owner = %cell.owner, "sequence completed");
                    if let Some(on_finish) = on_finish {
                        on_finish(rt);
                    }
                    return;
                }
                Ok(Step::Wait(Condition::AfterTicks(0))) => {
                    wake = Wake::Ticks { elapsed: 0 };
                }
                Ok(Step::Wait(condition)) => {
                    drop(control);
                    let pending = self.install(rt, cell, condition);
                    *cell.body.lock() = Some(body);

                    let mut control = cell.control.lock();
                    control.pending = Some(pending);
                    control.since = rt.tick();
                    control.state = SequenceState::Suspended;
                    control.stuck_reported = false;
                    control.running = false;
                    return;
                }
                Err(error) => {
                    control.running = false;
                    drop(control);
                    drop(body);
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    warn!(sequence = %cell.id, owner = %cell.owner, %error, "sequence failed");
                    self.finish_cancelled(rt, cell);
                    return;
                }
            }
        }
    }

    fn install(&self, rt: &Runtime, cell: &Arc<SequenceCell>, condition: Condition) -> Pending {
        match condition {
            Condition::AfterTicks(count) => Pending::Ticks(count),
            Condition::Until(predicate) => Pending::Until(predicate),
            Condition::OnEvent(wait) => {
                let target = Arc::clone(cell);
                let mut filter = wait.filter;
                let spec = SubscriptionSpec::new(cell.owner, wait.kind).with_priority(wait.priority);
                let subscription = rt.bus().subscribe(spec, move |event, rt: &Runtime| {
                    if filter.as_mut().map_or(true, |accept| accept(&*event)) {
                        rt.scheduler().wake_on_event(rt, &target, event);
                    }
                    Ok(())
                });
                Pending::Event {
                    subscription,
                    timeout: wait.timeout,
                }
            }
        }
    }

    fn finish_cancelled(&self, rt: &Runtime, cell: &Arc<SequenceCell>) -> bool {
        let (teardown, pending, on_finish) = {
            let mut control = cell.control.lock();
            if control.state.is_finished() {
                return false;
            }
            control.state = SequenceState::Cancelled;
            control.cancel_requested = false;
            control.running = false;
            (
                control.on_cancel.take(),
                control.pending.take(),
                control.on_finish.take(),
            )
        };
        if let Some(Pending::Event { subscription, .. }) = pending {
            rt.bus().unsubscribe(subscription);
        }
        drop(cell.body.lock().take());
        self.entries.lock().remove(&cell.key());
        debug!(sequence = %cell.id, owner = %cell.owner, "sequence cancelled");

        if let Some(teardown) = teardown {
            teardown(rt);
        }
        if let Some(on_finish) = on_finish {
            on_finish(rt);
        }
        true
    }

    /// Cancels one sequence. A sequence cancelled while it runs finishes its
    /// current resumption, then is discarded. Returns false if it had already
    /// finished.
    pub(crate) fn cancel(&self, rt: &Runtime, handle: &SequenceHandle) -> bool {
        {
            let mut control = handle.cell.control.lock();
            if control.state.is_finished() {
                return false;
            }
            if control.running {
                control.cancel_requested = true;
                return true;
            }
        }
        self.finish_cancelled(rt, &handle.cell)
    }

    /// Cancels every sequence of an owner. Returns how many were cancelled.
    pub(crate) fn cancel_owner(&self, rt: &Runtime, owner: OwnerId) -> usize {
        let doomed: Vec<_> = self
            .entries
            .lock()
            .range((owner, SequenceId(0))..=(owner, SequenceId(u64::MAX)))
            .map(|(_, cell)| SequenceHandle {
                cell: Arc::clone(cell),
            })
            .collect();
        doomed
            .iter()
            .filter(|handle| self.cancel(rt, handle))
            .count()
    }

    /// Wakes a suspended sequence immediately.
    pub(crate) fn resume(&self, rt: &Runtime, handle: &SequenceHandle) -> CoreResult<()> {
        let cell = &handle.cell;
        let pending = {
            let mut control = cell.control.lock();
            if control.state.is_finished() {
                let err = CoreError::SequenceFinished {
                    id: cell.id,
                    state: control.state,
                };
                error!(sequence = %cell.id, owner = %cell.owner, %err, "rejected resume");
                return Err(err);
            }
            if control.running {
                return Err(CoreError::SequenceRunning(cell.id));
            }
            if control.state != SequenceState::Suspended {
                return Err(CoreError::SequenceNotSuspended(cell.id));
            }
            control.pending.take()
        };
        if let Some(Pending::Event { subscription, .. }) = pending {
            rt.bus().unsubscribe(subscription);
        }
        self.run(rt, cell, Wake::Forced, None);
        Ok(())
    }

    /// Live sequences by state.
    #[must_use]
    pub fn counts(&self) -> SequenceCounts {
        let entries = self.entries.lock();
        let mut counts = SequenceCounts::default();
        for cell in entries.values() {
            match cell.control.lock().state {
                SequenceState::Runnable => counts.runnable += 1,
                SequenceState::Suspended => counts.suspended += 1,
                SequenceState::Completed | SequenceState::Cancelled => {}
            }
        }
        counts
    }

    /// Suspended sequences older than the stuck threshold.
    #[must_use]
    pub fn stuck(&self, now: Tick) -> Vec<StuckSequence> {
        if self.stuck_after == 0 {
            return Vec::new();
        }
        let entries = self.entries.lock();
        entries
            .values()
            .filter_map(|cell| {
                let control = cell.control.lock();
                let suspended_for = now.since(control.since);
                (control.state == SequenceState::Suspended && suspended_for >= self.stuck_after)
                    .then_some(StuckSequence {
                        id: cell.id,
                        owner: cell.owner,
                        suspended_for,
                    })
            })
            .collect()
    }

    /// Number of sequence faults seen so far.
    #[must_use]
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}
