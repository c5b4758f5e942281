//! # Sequences
//!
//! A sequence is a multi-tick procedure written as an explicit state machine.
//! The scheduler calls [`Sequence::resume`]; the body does the work that is
//! due and returns a [`Step`]: either [`Step::Done`] or a [`Condition`] to
//! sleep on. Returning is the only way to yield; nothing keeps running in the
//! background between two resumptions.
//!
//! ```text
//!            start
//!              |
//!              v
//!  +-------> Runnable --Done--> Completed
//!  |           |   \
//!  |  Wait(c)  |    `--Err / owner disabled--> Cancelled (on_cancel runs once)
//!  |           v
//!  +------ Suspended(c)
//!   c met
//! ```

use std::collections::VecDeque;
use std::fmt;

use cadence_shared::{OwnerId, Priority, Tick};

use crate::error::HandlerResult;
use crate::event::{Event, EventKind};
use crate::runtime::Runtime;
use crate::scheduler::SequenceId;

/// A suspendable procedure.
pub trait Sequence: Send {
    /// Runs the body until it finishes or needs to wait.
    ///
    /// # Errors
    ///
    /// A fault cancels the sequence; its teardown still runs.
    fn resume(&mut self, cx: &mut SequenceContext<'_>) -> HandlerResult<Step>;
}

impl<S: Sequence + ?Sized> Sequence for Box<S> {
    fn resume(&mut self, cx: &mut SequenceContext<'_>) -> HandlerResult<Step> {
        (**self).resume(cx)
    }
}

/// Sequence backed by a closure. Built with [`from_fn`].
pub struct FnSequence<F>(F);

impl<F> Sequence for FnSequence<F>
where
    F: FnMut(&mut SequenceContext<'_>) -> HandlerResult<Step> + Send,
{
    fn resume(&mut self, cx: &mut SequenceContext<'_>) -> HandlerResult<Step> {
        (self.0)(cx)
    }
}

/// Wraps a closure as a [`Sequence`]. The closure keeps its own state
/// between resumptions.
pub fn from_fn<F>(body: F) -> FnSequence<F>
where
    F: FnMut(&mut SequenceContext<'_>) -> HandlerResult<Step> + Send,
{
    FnSequence(body)
}

/// Outcome of one resumption.
#[derive(Debug)]
pub enum Step {
    /// Suspend until the condition is met.
    Wait(Condition),
    /// The sequence completed normally.
    Done,
}

impl Step {
    /// Suspend for `ticks` ticks. `0` continues immediately.
    #[must_use]
    pub const fn ticks(ticks: u32) -> Self {
        Self::Wait(Condition::AfterTicks(ticks))
    }

    /// Suspend until the predicate holds on a later tick.
    #[must_use]
    pub fn until<F>(predicate: F) -> Self
    where
        F: FnMut(&Probe<'_>) -> bool + Send + 'static,
    {
        Self::Wait(Condition::until(predicate))
    }

    /// Suspend until the next matching event.
    #[must_use]
    pub fn event(wait: EventWait) -> Self {
        Self::Wait(Condition::OnEvent(wait))
    }
}

/// Predicate of an [`Condition::Until`] wait.
pub type Predicate = Box<dyn FnMut(&Probe<'_>) -> bool + Send>;

/// Resumption condition of a suspended sequence.
pub enum Condition {
    /// Resume once this many ticks have elapsed.
    AfterTicks(u32),
    /// Resume on the first later tick the predicate evaluates true.
    Until(Predicate),
    /// Resume synchronously inside the publish of a matching event.
    OnEvent(EventWait),
}

impl Condition {
    /// Boxes a predicate.
    pub fn until<F>(predicate: F) -> Self
    where
        F: FnMut(&Probe<'_>) -> bool + Send + 'static,
    {
        Self::Until(Box::new(predicate))
    }
}

impl From<EventWait> for Condition {
    fn from(wait: EventWait) -> Self {
        Self::OnEvent(wait)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterTicks(n) => f.debug_tuple("AfterTicks").field(n).finish(),
            Self::Until(_) => f.write_str("Until(..)"),
            Self::OnEvent(wait) => f.debug_tuple("OnEvent").field(wait).finish(),
        }
    }
}

/// Event filter of an [`EventWait`].
pub type EventFilter = Box<dyn FnMut(&Event) -> bool + Send>;

/// An `OnEvent` wait.
pub struct EventWait {
    pub(crate) kind: EventKind,
    pub(crate) priority: Priority,
    pub(crate) filter: Option<EventFilter>,
    pub(crate) timeout: u32,
}

impl EventWait {
    /// Waits for the next event of `kind`, at normal priority, forever.
    ///
    /// A wait on [`EventKind::Intercept`] is moved to the matching
    /// [`EventKind::Packet`], so the sequence resumes only once every
    /// interceptor has decided.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        let kind = match kind {
            EventKind::Intercept(origin) => EventKind::Packet(origin),
            other => other,
        };
        Self {
            kind,
            priority: Priority::NORMAL,
            filter: None,
            timeout: 0,
        }
    }

    /// Priority of the temporary subscription, relative to other handlers.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Only events accepted by `filter` resume the sequence.
    #[must_use]
    pub fn matching<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&Event) -> bool + Send + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Resume with [`Wake::TimedOut`] after this many ticks without a match.
    #[must_use]
    pub fn with_timeout(mut self, ticks: u32) -> Self {
        self.timeout = ticks;
        self
    }
}

impl fmt::Debug for EventWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWait")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// What an `Until` predicate can look at.
pub struct Probe<'a> {
    pub(crate) runtime: &'a Runtime,
    pub(crate) tick: Tick,
    pub(crate) elapsed: u64,
}

impl<'a> Probe<'a> {
    /// The runtime.
    #[must_use]
    pub const fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    /// Current tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Ticks since the sequence suspended. The first check sees `1`.
    #[must_use]
    pub const fn elapsed(&self) -> u64 {
        self.elapsed
    }
}

/// Why a sequence is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// First run, right after start.
    Start,
    /// An `AfterTicks` wait elapsed.
    Ticks {
        /// Ticks spent suspended.
        elapsed: u64,
    },
    /// An `Until` predicate held.
    Condition {
        /// Ticks spent suspended.
        elapsed: u64,
    },
    /// A matching event arrived; see [`SequenceContext::event_mut`].
    Event,
    /// An `OnEvent` wait ran out of time.
    TimedOut,
    /// Woken explicitly through `Runtime::resume_sequence`.
    Forced,
}

/// Teardown callback run when a sequence is cancelled.
pub type Teardown = Box<dyn FnOnce(&Runtime) + Send>;

pub(crate) enum TeardownUpdate {
    Keep,
    Set(Teardown),
    Clear,
}

/// Everything a sequence body can reach while it runs.
pub struct SequenceContext<'a> {
    runtime: &'a Runtime,
    id: SequenceId,
    owner: OwnerId,
    tick: Tick,
    wake: Wake,
    event: Option<&'a mut Event>,
    teardown: TeardownUpdate,
}

impl<'a> SequenceContext<'a> {
    pub(crate) fn new(
        runtime: &'a Runtime,
        id: SequenceId,
        owner: OwnerId,
        wake: Wake,
        event: Option<&'a mut Event>,
    ) -> Self {
        Self {
            runtime,
            id,
            owner,
            tick: runtime.tick(),
            wake,
            event,
            teardown: TeardownUpdate::Keep,
        }
    }

    /// The runtime. Sequences register interceptors, submit aim requests and
    /// start other sequences through it.
    #[must_use]
    pub const fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    /// Id of the running sequence.
    #[must_use]
    pub const fn id(&self) -> SequenceId {
        self.id
    }

    /// Owner of the running sequence.
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Current tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Why the body runs.
    #[must_use]
    pub const fn wake(&self) -> Wake {
        self.wake
    }

    /// Event being published, if the sequence runs inside a publish.
    #[must_use]
    pub fn event(&self) -> Option<&Event> {
        self.event.as_deref()
    }

    /// Mutable access to the event being published. Cancelling it or
    /// negotiating its fields is visible to lower-priority handlers.
    pub fn event_mut(&mut self) -> Option<&mut Event> {
        self.event.as_deref_mut()
    }

    /// Registers the teardown run if the sequence is cancelled. Replaces a
    /// teardown registered earlier.
    pub fn on_cancel<F>(&mut self, teardown: F)
    where
        F: FnOnce(&Runtime) + Send + 'static,
    {
        self.teardown = TeardownUpdate::Set(Box::new(teardown));
    }

    /// Drops the registered teardown, once the guarded change is complete.
    pub fn clear_on_cancel(&mut self) {
        self.teardown = TeardownUpdate::Clear;
    }

    pub(crate) fn into_teardown(self) -> TeardownUpdate {
        self.teardown
    }
}

/// How an event-triggered sequence reacts to a new event while the previous
/// one is still alive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartBehavior {
    /// Start another one alongside.
    Parallel,
    /// Ignore the event.
    #[default]
    DiscardLatest,
    /// Cancel the previous one, then start.
    CancelPrevious,
    /// Keep the event and start its sequence once every earlier one has
    /// finished, so events are handled one by one in arrival order.
    Suspend,
}

type Stage = Box<dyn FnMut(&mut SequenceContext<'_>) -> HandlerResult<Option<Condition>> + Send>;

fn stage<F>(body: F) -> Stage
where
    F: FnMut(&mut SequenceContext<'_>) -> HandlerResult<Option<Condition>> + Send + 'static,
{
    Box::new(body)
}

/// Straight-line sequence made of stages.
///
/// ```text
/// Script::new()
///     .then(|cx| { start blinking; Ok(()) })
///     .wait_ticks(10)
///     .then(|cx| { flush; Ok(()) })
/// ```
#[derive(Default)]
pub struct Script {
    stages: VecDeque<Stage>,
}

impl Script {
    /// Empty script; completes on its first run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` once, then continues with the next stage.
    #[must_use]
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: FnOnce(&mut SequenceContext<'_>) -> HandlerResult + Send + 'static,
    {
        let mut action = Some(action);
        self.stages.push_back(stage(move |cx| {
            if let Some(action) = action.take() {
                action(cx)?;
            }
            Ok(None)
        }));
        self
    }

    /// Runs `action` once; if it returns a condition, waits on it before the
    /// next stage.
    #[must_use]
    pub fn then_wait<F>(mut self, action: F) -> Self
    where
        F: FnOnce(&mut SequenceContext<'_>) -> HandlerResult<Option<Condition>> + Send + 'static,
    {
        let mut action = Some(action);
        self.stages.push_back(stage(move |cx| match action.take() {
            Some(action) => action(cx),
            None => Ok(None),
        }));
        self
    }

    /// Waits `ticks` ticks.
    #[must_use]
    pub fn wait_ticks(mut self, ticks: u32) -> Self {
        self.stages
            .push_back(stage(move |_| Ok(Some(Condition::AfterTicks(ticks)))));
        self
    }

    /// Waits until the predicate holds.
    #[must_use]
    pub fn wait_until<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&Probe<'_>) -> bool + Send + 'static,
    {
        let mut predicate = Some(predicate);
        self.stages
            .push_back(stage(move |_| Ok(predicate.take().map(Condition::until))));
        self
    }

    /// Waits for an event.
    #[must_use]
    pub fn wait_event(mut self, wait: EventWait) -> Self {
        let mut wait = Some(wait);
        self.stages
            .push_back(stage(move |_| Ok(wait.take().map(Condition::OnEvent))));
        self
    }

    /// Number of stages not yet run.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

impl Sequence for Script {
    fn resume(&mut self, cx: &mut SequenceContext<'_>) -> HandlerResult<Step> {
        while let Some(mut next) = self.stages.pop_front() {
            if let Some(condition) = next(cx)? {
                return Ok(Step::Wait(condition));
            }
        }
        Ok(Step::Done)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("remaining", &self.stages.len())
            .finish()
    }
}
