//! # Runtime
//!
//! The façade behavioural modules and the host talk to. It owns every
//! component and fixes the order they run in within one tick:
//!
//! ```text
//! on_tick()
//!   1. clock += 1
//!   2. publish Tick            handlers + OnEvent(Tick) waits, priority order
//!   3. scheduler.poll()        AfterTicks / Until waits, owner order
//!   4. aim: resolve + apply    exactly one winner, or timeout policy
//!   5. pipeline.release_lapsed disabled holders / max hold age
//! ```
//!
//! Network messages arrive between ticks through `on_inbound` and
//! `on_outbound`; the host evaluates a tick's inbound messages after
//! `on_tick` returned, so released history always precedes them.
//!
//! `Runtime` is a cheap handle; clones share the same state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cadence_shared::{Action, Message, Origin, OwnerId, Priority, Rotation, Tick};
use parking_lot::Mutex;

use crate::arbitrator::{OutputArbitrator, OutputChange, OutputConsumer, ResetPolicy};
use crate::bus::{EventBus, SubscriptionHandle, SubscriptionSpec};
use crate::config::RuntimeConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{CoreError, CoreResult, HandlerResult};
use crate::event::{CancelPolicy, Event, EventKind};
use crate::owner::OwnerRegistry;
use crate::pipeline::{interceptor_handler, MessageSink, PacketPipeline, Verdict};
use crate::scheduler::{Finish, SequenceHandle, SequenceScheduler};
use crate::sequence::{Sequence, StartBehavior};

struct Aim {
    arbitrator: OutputArbitrator<Rotation>,
    consumer: OutputConsumer<Rotation>,
}

struct Shared {
    config: RuntimeConfig,
    clock: AtomicU64,
    in_tick: AtomicBool,
    owners: OwnerRegistry,
    bus: EventBus<Runtime>,
    scheduler: SequenceScheduler,
    pipeline: PacketPipeline,
    aim: Mutex<Aim>,
}

/// What one tick did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    /// The tick that was processed.
    pub tick: Tick,
    /// Sequences resumed by the tick poll.
    pub resumed: usize,
    /// Effect on the orientation output.
    pub aim: OutputChange<Rotation>,
    /// Held messages released at end of tick.
    pub released: usize,
}

/// Handle to the automation core.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Creates a runtime at tick zero.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let aim = Aim {
            arbitrator: OutputArbitrator::new(),
            consumer: OutputConsumer::new(ResetPolicy::from_ticks(config.aim.reset_after_ticks)),
        };
        Self {
            shared: Arc::new(Shared {
                clock: AtomicU64::new(0),
                in_tick: AtomicBool::new(false),
                owners: OwnerRegistry::new(),
                bus: EventBus::new(),
                scheduler: SequenceScheduler::new(config.stuck_sequence_ticks),
                pipeline: PacketPipeline::new(config.pipeline.clone()),
                aim: Mutex::new(aim),
                config,
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Current tick. `Tick::ZERO` before the first `on_tick`.
    #[must_use]
    pub fn tick(&self) -> Tick {
        Tick(self.shared.clock.load(Ordering::Acquire))
    }

    pub(crate) fn bus(&self) -> &EventBus<Self> {
        &self.shared.bus
    }

    pub(crate) fn scheduler(&self) -> &SequenceScheduler {
        &self.shared.scheduler
    }

    // ========================================================================
    // OWNERS
    // ========================================================================

    /// Registers a behavioural module.
    pub fn register_owner(&self, name: impl Into<String>) -> OwnerId {
        let name = name.into();
        let owner = self.shared.owners.register(name.clone());
        tracing::debug!(%owner, name = %name, "owner registered");
        owner
    }

    /// Returns true if the owner exists and is enabled.
    #[must_use]
    pub fn is_enabled(&self, owner: OwnerId) -> bool {
        self.shared.owners.is_enabled(owner)
    }

    /// Display name of an owner.
    #[must_use]
    pub fn owner_name(&self, owner: OwnerId) -> Option<String> {
        self.shared.owners.name(owner)
    }

    /// Re-enables an owner. Its earlier registrations are gone; the module
    /// registers again.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownOwner`].
    pub fn enable_owner(&self, owner: OwnerId) -> CoreResult<()> {
        if !self.shared.owners.set_enabled(owner, true)? {
            tracing::info!(%owner, "owner enabled");
        }
        Ok(())
    }

    /// Disables an owner and tears down everything it registered:
    /// subscriptions and interceptors are removed, sequences are cancelled
    /// (teardowns run now), the pending aim request is withdrawn. Messages it
    /// holds are released at the end of the current tick.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownOwner`].
    pub fn disable_owner(&self, owner: OwnerId) -> CoreResult<()> {
        if !self.shared.owners.set_enabled(owner, false)? {
            return Ok(());
        }
        let subscriptions = self.shared.bus.unsubscribe_all(owner);
        let sequences = self.shared.scheduler.cancel_owner(self, owner);
        self.shared.aim.lock().arbitrator.withdraw(owner);
        tracing::info!(%owner, subscriptions, sequences, "owner disabled");
        Ok(())
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Registers an event handler.
    ///
    /// # Errors
    ///
    /// Fails for unknown or disabled owners.
    pub fn subscribe<F>(&self, spec: SubscriptionSpec, handler: F) -> CoreResult<SubscriptionHandle>
    where
        F: FnMut(&mut Event, &Self) -> HandlerResult + Send + 'static,
    {
        self.shared.owners.ensure_enabled(spec.owner)?;
        Ok(self.shared.bus.subscribe(spec, handler))
    }

    /// Removes one subscription, interceptor or event trigger.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.shared.bus.unsubscribe(handle)
    }

    /// Overrides whether cancelling an event of `kind` stops delivery.
    pub fn declare_cancel_policy(&self, kind: EventKind, policy: CancelPolicy) {
        self.shared.bus.declare_kind(kind, policy);
    }

    /// Publishes an event and returns it with the handlers' changes applied.
    pub fn publish(&self, mut event: Event) -> Event {
        self.publish_in_place(&mut event);
        event
    }

    pub(crate) fn publish_in_place(&self, event: &mut Event) {
        event.stamp(self.tick());
        self.shared.bus.publish(self, event);
    }

    // ========================================================================
    // SEQUENCES
    // ========================================================================

    /// Starts a sequence. Its first step runs before this returns.
    ///
    /// # Errors
    ///
    /// Fails for unknown or disabled owners.
    pub fn start_sequence<S>(&self, owner: OwnerId, sequence: S) -> CoreResult<SequenceHandle>
    where
        S: Sequence + 'static,
    {
        self.shared.owners.ensure_enabled(owner)?;
        Ok(self
            .shared
            .scheduler
            .start(self, owner, Box::new(sequence), None, None))
    }

    /// Starts a fresh sequence from `factory` for every matching event, inside
    /// the publish, so its first step can still cancel or negotiate the event.
    /// With [`StartBehavior::Suspend`] a backlogged event starts its sequence
    /// later, from a snapshot taken when it was published.
    ///
    /// # Errors
    ///
    /// Fails for unknown or disabled owners.
    pub fn on_event_sequence<F, S>(
        &self,
        spec: SubscriptionSpec,
        behavior: StartBehavior,
        mut factory: F,
    ) -> CoreResult<SubscriptionHandle>
    where
        F: FnMut() -> S + Send + 'static,
        S: Sequence + 'static,
    {
        let owner = spec.owner;
        if behavior == StartBehavior::Suspend {
            let make: SequenceFactory = Box::new(move || Box::new(factory()) as Box<dyn Sequence>);
            let serial = Arc::new(SerialStarts {
                owner,
                factory: Mutex::new(make),
                state: Mutex::default(),
            });
            return self.subscribe(spec, move |event, rt| {
                serial.trigger(rt, event);
                Ok(())
            });
        }

        let mut last: Option<SequenceHandle> = None;
        self.subscribe(spec, move |event, rt| {
            if let Some(previous) = last.as_ref().filter(|handle| handle.is_alive()) {
                match behavior {
                    StartBehavior::Parallel | StartBehavior::Suspend => {}
                    StartBehavior::DiscardLatest => return Ok(()),
                    StartBehavior::CancelPrevious => {
                        rt.shared.scheduler.cancel(rt, previous);
                    }
                }
            }
            let body = Box::new(factory());
            last = Some(rt.shared.scheduler.start(rt, owner, body, Some(event), None));
            Ok(())
        })
    }

    /// Runs a fresh iteration of `factory` every tick unless the previous
    /// one is still suspended.
    ///
    /// # Errors
    ///
    /// Fails for unknown or disabled owners.
    pub fn tick_sequence<F, S>(&self, owner: OwnerId, factory: F) -> CoreResult<SubscriptionHandle>
    where
        F: FnMut() -> S + Send + 'static,
        S: Sequence + 'static,
    {
        self.on_event_sequence(
            SubscriptionSpec::new(owner, EventKind::Tick),
            StartBehavior::DiscardLatest,
            factory,
        )
    }

    /// Cancels one sequence. Returns false if it had already finished.
    pub fn cancel_sequence(&self, handle: &SequenceHandle) -> bool {
        self.shared.scheduler.cancel(self, handle)
    }

    /// Wakes a suspended sequence now, with [`Wake::Forced`](crate::Wake::Forced).
    ///
    /// # Errors
    ///
    /// Finished sequences are rejected and logged; a running sequence cannot
    /// resume itself.
    pub fn resume_sequence(&self, handle: &SequenceHandle) -> CoreResult<()> {
        self.shared.scheduler.resume(self, handle)
    }

    // ========================================================================
    // PACKETS
    // ========================================================================

    /// Registers an interceptor deciding Pass, Cancel or Queue for every
    /// message of `origin`.
    ///
    /// # Errors
    ///
    /// Fails for unknown or disabled owners.
    pub fn register_interceptor<F>(
        &self,
        owner: OwnerId,
        origin: Origin,
        priority: Priority,
        interceptor: F,
    ) -> CoreResult<SubscriptionHandle>
    where
        F: FnMut(&Message, &Self) -> HandlerResult<Action> + Send + 'static,
    {
        let spec = SubscriptionSpec::new(owner, EventKind::Intercept(origin)).with_priority(priority);
        self.subscribe(spec, interceptor_handler(owner, interceptor))
    }

    /// Runs a received message through the pipeline before the simulation
    /// applies it.
    pub fn on_inbound(&self, message: Message) -> Verdict {
        self.shared.pipeline.evaluate(self, Origin::Inbound, message)
    }

    /// Runs a message through the pipeline before it is sent.
    pub fn on_outbound(&self, message: Message) -> Verdict {
        self.shared.pipeline.evaluate(self, Origin::Outbound, message)
    }

    /// Releases every held message of an origin, oldest first.
    pub fn flush(&self, origin: Origin) -> usize {
        self.shared.pipeline.flush(origin)
    }

    /// Sets where released messages of an origin go.
    pub fn set_sink(&self, origin: Origin, sink: Arc<dyn MessageSink>) {
        self.shared.pipeline.set_sink(origin, sink);
    }

    /// Takes the messages released before a sink was set for their origin.
    pub fn take_unclaimed(&self) -> Vec<(Origin, Message)> {
        self.shared.pipeline.take_unclaimed()
    }

    /// Number of held messages of an origin.
    #[must_use]
    pub fn queued(&self, origin: Origin) -> usize {
        self.shared.pipeline.queued(origin)
    }

    // ========================================================================
    // ORIENTATION
    // ========================================================================

    /// Requests the orientation for this tick. A later request from the same
    /// owner replaces the earlier one.
    ///
    /// # Errors
    ///
    /// Fails for unknown or disabled owners.
    pub fn submit_aim(&self, owner: OwnerId, rotation: Rotation, priority: Priority) -> CoreResult<()> {
        self.shared.owners.ensure_enabled(owner)?;
        let tick = self.tick();
        self.shared
            .aim
            .lock()
            .arbitrator
            .submit(owner, rotation, priority, tick);
        Ok(())
    }

    /// Orientation currently applied, `None` while the player has control.
    #[must_use]
    pub fn aim(&self) -> Option<Rotation> {
        self.shared.aim.lock().consumer.current().copied()
    }

    fn resolve_aim(&self) -> OutputChange<Rotation> {
        let mut aim = self.shared.aim.lock();
        let resolved = aim.arbitrator.resolve().map(|request| request.value);
        let idle = aim.arbitrator.ticks_since_resolution();
        aim.consumer.apply(resolved, idle)
    }

    // ========================================================================
    // TICK
    // ========================================================================

    /// Advances the simulation by one tick.
    ///
    /// # Errors
    ///
    /// [`CoreError::ReentrantTick`] if called from inside a tick.
    pub fn on_tick(&self) -> CoreResult<TickReport> {
        if self.shared.in_tick.swap(true, Ordering::AcqRel) {
            let err = CoreError::ReentrantTick(self.tick());
            tracing::error!(%err, "rejected on_tick");
            return Err(err);
        }
        let _guard = TickGuard(&self.shared.in_tick);

        let tick = Tick(self.shared.clock.fetch_add(1, Ordering::AcqRel) + 1);
        self.publish_in_place(&mut Event::tick());
        let resumed = self.shared.scheduler.poll(self, tick);
        let aim = self.resolve_aim();
        let released = self.shared.pipeline.release_lapsed(&self.shared.owners, tick);

        tracing::trace!(%tick, resumed, released, "tick processed");
        Ok(TickReport {
            tick,
            resumed,
            aim,
            released,
        })
    }

    /// Snapshot of the runtime's health.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let tick = self.tick();
        let shared = &self.shared;
        Diagnostics {
            tick,
            owners: shared.owners.len(),
            enabled_owners: shared.owners.enabled_count(),
            subscriptions: shared.bus.len(),
            sequences: shared.scheduler.counts(),
            stuck: shared.scheduler.stuck(tick),
            queued: [
                shared.pipeline.queued(Origin::Inbound),
                shared.pipeline.queued(Origin::Outbound),
            ],
            faults: shared.bus.faults() + shared.scheduler.faults(),
        }
    }
}

type SequenceFactory = Box<dyn FnMut() -> Box<dyn Sequence> + Send>;

/// Event-triggered sequences that run one at a time. Events arriving while
/// one runs wait in arrival order.
struct SerialStarts {
    owner: OwnerId,
    factory: Mutex<SequenceFactory>,
    state: Mutex<SerialState>,
}

#[derive(Default)]
struct SerialState {
    busy: bool,
    backlog: VecDeque<Event>,
}

impl SerialStarts {
    fn trigger(self: &Arc<Self>, rt: &Runtime, event: &mut Event) {
        {
            let mut state = self.state.lock();
            if state.busy {
                state.backlog.push_back(event.clone());
                tracing::trace!(
                    owner = %self.owner,
                    kind = %event.kind(),
                    backlog = state.backlog.len(),
                    "event backlogged"
                );
                return;
            }
            state.busy = true;
        }
        self.launch(rt, event);
    }

    fn launch(self: &Arc<Self>, rt: &Runtime, event: &mut Event) {
        let body = {
            let mut factory = self.factory.lock();
            (*factory)()
        };
        let next = Arc::clone(self);
        let on_finish: Finish = Box::new(move |rt: &Runtime| next.advance(rt));
        rt.shared
            .scheduler
            .start(rt, self.owner, body, Some(event), Some(on_finish));
    }

    fn advance(self: &Arc<Self>, rt: &Runtime) {
        let next = {
            let mut state = self.state.lock();
            if !rt.is_enabled(self.owner) {
                state.backlog.clear();
            }
            let next = state.backlog.pop_front();
            state.busy = next.is_some();
            next
        };
        if let Some(mut event) = next {
            self.launch(rt, &mut event);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
