//! # Event Bus
//!
//! Priority-ordered publish/subscribe. Everything else in the core is built
//! on it: the scheduler parks `OnEvent` waits here, the pipeline registers
//! interceptors here.
//!
//! ## Ordering
//!
//! ```text
//! kind -> [ p=1000 #3 | p=0 #1 | p=0 #4 | p=-1000 #2 ]
//!          descending priority, registration order among equals
//! ```
//!
//! ## Re-entrancy
//!
//! Handler tables are copy-on-write. A publish walks the snapshot taken when
//! it started, so handlers may subscribe, unsubscribe or publish again while
//! it runs. A removed subscription is deactivated before it leaves the table
//! and is never invoked afterwards, not even by a publish already in flight.
//! A handler that publishes its own kind again is skipped by the nested
//! publish instead of being entered twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cadence_shared::{OwnerId, Priority};
use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use crate::error::HandlerResult;
use crate::event::{CancelPolicy, Event, EventKind, Phase};

/// Boxed event handler. `C` is the context handed to every handler.
pub type Handler<C> = Box<dyn FnMut(&mut Event, &C) -> HandlerResult + Send>;

/// Handle to one subscription, returned at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    kind: EventKind,
    owner: OwnerId,
}

impl SubscriptionHandle {
    /// Event kind the subscription listens to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Owner of the subscription.
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }
}

/// What a subscription listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Owning module.
    pub owner: OwnerId,
    /// Event kind.
    pub kind: EventKind,
    /// Invocation priority, higher first.
    pub priority: Priority,
    /// Only events of this phase are delivered.
    pub phase: Option<Phase>,
}

impl SubscriptionSpec {
    /// Subscription at [`Priority::NORMAL`] without phase filter.
    #[must_use]
    pub const fn new(owner: OwnerId, kind: EventKind) -> Self {
        Self {
            owner,
            kind,
            priority: Priority::NORMAL,
            phase: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the phase filter.
    #[must_use]
    pub const fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }
}

struct Subscription<C> {
    id: u64,
    owner: OwnerId,
    priority: Priority,
    phase: Option<Phase>,
    active: AtomicBool,
    handler: Mutex<Handler<C>>,
}

type Table<C> = Arc<Vec<Arc<Subscription<C>>>>;

/// Priority-ordered publish/subscribe bus.
pub struct EventBus<C> {
    tables: RwLock<HashMap<EventKind, Table<C>>>,
    policies: RwLock<HashMap<EventKind, CancelPolicy>>,
    next_id: AtomicU64,
    faults: AtomicU64,
}

impl<C> EventBus<C> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            faults: AtomicU64::new(0),
        }
    }

    /// Overrides the cancellation policy of a kind.
    pub fn declare_kind(&self, kind: EventKind, policy: CancelPolicy) {
        self.policies.write().insert(kind, policy);
    }

    /// Cancellation policy in effect for a kind.
    #[must_use]
    pub fn policy(&self, kind: EventKind) -> CancelPolicy {
        self.policies
            .read()
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_policy())
    }

    /// Registers a handler.
    pub fn subscribe<F>(&self, spec: SubscriptionSpec, handler: F) -> SubscriptionHandle
    where
        F: FnMut(&mut Event, &C) -> HandlerResult + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            owner: spec.owner,
            priority: spec.priority,
            phase: spec.phase,
            active: AtomicBool::new(true),
            handler: Mutex::new(Box::new(handler)),
        });

        let mut tables = self.tables.write();
        let slot = tables.entry(spec.kind).or_default();
        let mut next = Vec::with_capacity(slot.len() + 1);
        next.extend(slot.iter().cloned());
        // Stable: a newcomer goes after every subscription of equal priority.
        let at = next.partition_point(|existing| existing.priority >= spec.priority);
        next.insert(at, subscription);
        *slot = Arc::new(next);

        trace!(owner = %spec.owner, kind = %spec.kind, priority = %spec.priority, id, "subscribed");
        SubscriptionHandle {
            id,
            kind: spec.kind,
            owner: spec.owner,
        }
    }

    /// Removes one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut tables = self.tables.write();
        let Some(slot) = tables.get_mut(&handle.kind) else {
            return false;
        };
        let Some(found) = slot.iter().find(|s| s.id == handle.id) else {
            return false;
        };
        found.active.store(false, Ordering::Release);
        let next: Vec<_> = slot.iter().filter(|s| s.id != handle.id).cloned().collect();
        *slot = Arc::new(next);
        true
    }

    /// Removes every subscription of an owner. Returns how many were removed.
    pub fn unsubscribe_all(&self, owner: OwnerId) -> usize {
        let mut removed = 0;
        let mut tables = self.tables.write();
        for slot in tables.values_mut() {
            if !slot.iter().any(|s| s.owner == owner) {
                continue;
            }
            let mut next = Vec::with_capacity(slot.len());
            for subscription in slot.iter() {
                if subscription.owner == owner {
                    subscription.active.store(false, Ordering::Release);
                    removed += 1;
                } else {
                    next.push(Arc::clone(subscription));
                }
            }
            *slot = Arc::new(next);
        }
        removed
    }

    /// Delivers an event to every matching subscription in priority order.
    ///
    /// Handler faults are logged and counted; the remaining handlers still
    /// run. For short-circuit kinds delivery stops once the event is
    /// cancelled or an interception decision was taken.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, cx: &C, event: &mut Event) -> usize {
        let kind = event.kind();
        let Some(snapshot) = self.tables.read().get(&kind).cloned() else {
            return 0;
        };
        let short_circuit = self.policy(kind) == CancelPolicy::ShortCircuit;

        let mut invoked = 0;
        for subscription in snapshot.iter() {
            if short_circuit && event.is_settled() {
                trace!(%kind, "short-circuited");
                break;
            }
            if !subscription.active.load(Ordering::Acquire) {
                continue;
            }
            if subscription.phase.is_some_and(|phase| phase != event.phase()) {
                continue;
            }
            let Some(mut guard) = subscription.handler.try_lock() else {
                trace!(owner = %subscription.owner, %kind, "skipping re-entrant handler");
                continue;
            };
            let handler = &mut *guard;
            invoked += 1;
            if let Err(error) = handler(event, cx) {
                self.faults.fetch_add(1, Ordering::Relaxed);
                warn!(
                    owner = %subscription.owner,
                    %kind,
                    tick = %event.at(),
                    %error,
                    "event handler failed"
                );
            }
        }
        invoked
    }

    /// Number of live subscriptions for a kind.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.tables.read().get(&kind).map_or(0, |slot| slot.len())
    }

    /// Number of live subscriptions across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().values().map(|slot| slot.len()).sum()
    }

    /// Returns true if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of handler faults seen so far.
    #[must_use]
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_shared::{Action, Message, Origin};
    use parking_lot::Mutex as PlMutex;

    type Log = Arc<PlMutex<Vec<&'static str>>>;

    fn recorder(log: &Log, name: &'static str) -> impl FnMut(&mut Event, &()) -> HandlerResult {
        let log = Arc::clone(log);
        move |_, _| {
            log.lock().push(name);
            Ok(())
        }
    }

    #[test]
    fn test_priority_then_registration_order() {
        let bus = EventBus::<()>::new();
        let log = Log::default();
        let owner = OwnerId(0);

        bus.subscribe(SubscriptionSpec::new(owner, EventKind::Tick), recorder(&log, "normal-a"));
        bus.subscribe(
            SubscriptionSpec::new(owner, EventKind::Tick).with_priority(Priority::FIRST),
            recorder(&log, "first"),
        );
        bus.subscribe(SubscriptionSpec::new(owner, EventKind::Tick), recorder(&log, "normal-b"));
        bus.subscribe(
            SubscriptionSpec::new(owner, EventKind::Tick).with_priority(Priority::READ_FINAL_STATE),
            recorder(&log, "last"),
        );

        assert_eq!(bus.publish(&(), &mut Event::tick()), 4);
        assert_eq!(*log.lock(), ["first", "normal-a", "normal-b", "last"]);
    }

    #[test]
    fn test_phase_filter() {
        let bus = EventBus::<()>::new();
        let log = Log::default();
        let owner = OwnerId(0);

        bus.subscribe(
            SubscriptionSpec::new(owner, EventKind::PlayerTick).with_phase(Phase::Pre),
            recorder(&log, "pre"),
        );
        bus.subscribe(SubscriptionSpec::new(owner, EventKind::PlayerTick), recorder(&log, "any"));

        bus.publish(&(), &mut Event::player_tick(Phase::Post));
        assert_eq!(*log.lock(), ["any"]);
    }

    #[test]
    fn test_advisory_cancel_reaches_everyone() {
        let bus = EventBus::<()>::new();
        let log = Log::default();
        let owner = OwnerId(0);

        bus.subscribe(
            SubscriptionSpec::new(owner, EventKind::Tick).with_priority(Priority::FIRST),
            |event, _| {
                event.cancel();
                Ok(())
            },
        );
        bus.subscribe(SubscriptionSpec::new(owner, EventKind::Tick), recorder(&log, "observer"));

        let mut event = Event::tick();
        bus.publish(&(), &mut event);
        assert!(event.is_cancelled());
        assert_eq!(*log.lock(), ["observer"]);
    }

    #[test]
    fn test_short_circuit_stops_on_decision() {
        let bus = EventBus::<()>::new();
        let log = Log::default();
        let owner = OwnerId(4);
        let kind = EventKind::Intercept(Origin::Outbound);

        bus.subscribe(
            SubscriptionSpec::new(owner, kind).with_priority(Priority::SAFETY_FEATURE),
            move |event, _| {
                event.decide(Action::Queue, owner);
                Ok(())
            },
        );
        bus.subscribe(SubscriptionSpec::new(owner, kind), recorder(&log, "too late"));

        let mut event = Event::intercept(Origin::Outbound, Message::empty(7));
        assert_eq!(bus.publish(&(), &mut event), 1);
        assert_eq!(event.decision(), Action::Queue);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_declared_policy_overrides_default() {
        let bus = EventBus::<()>::new();
        let log = Log::default();
        let owner = OwnerId(0);
        bus.declare_kind(EventKind::WorldChange, CancelPolicy::ShortCircuit);

        bus.subscribe(SubscriptionSpec::new(owner, EventKind::WorldChange), |event, _| {
            event.cancel();
            Ok(())
        });
        bus.subscribe(SubscriptionSpec::new(owner, EventKind::WorldChange), recorder(&log, "x"));

        bus.publish(&(), &mut Event::world_change());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_fault_is_isolated() {
        let bus = EventBus::<()>::new();
        let log = Log::default();
        let owner = OwnerId(1);

        bus.subscribe(
            SubscriptionSpec::new(owner, EventKind::Tick).with_priority(Priority::FIRST),
            |_, _| Err("boom".into()),
        );
        bus.subscribe(SubscriptionSpec::new(owner, EventKind::Tick), recorder(&log, "after"));

        bus.publish(&(), &mut Event::tick());
        assert_eq!(*log.lock(), ["after"]);
        assert_eq!(bus.faults(), 1);
    }

    #[test]
    fn test_unsubscribe_all_during_publish() {
        let bus = Arc::new(EventBus::<()>::new());
        let log = Log::default();
        let victim = OwnerId(2);

        let inner = Arc::clone(&bus);
        bus.subscribe(
            SubscriptionSpec::new(OwnerId(1), EventKind::Tick).with_priority(Priority::FIRST),
            move |_, _| {
                inner.unsubscribe_all(victim);
                Ok(())
            },
        );
        bus.subscribe(SubscriptionSpec::new(victim, EventKind::Tick), recorder(&log, "victim"));

        bus.publish(&(), &mut Event::tick());
        assert!(log.lock().is_empty());
        assert_eq!(bus.subscriber_count(EventKind::Tick), 1);
    }

    #[test]
    fn test_subscribe_during_publish_waits_for_next() {
        let bus = Arc::new(EventBus::<()>::new());
        let log = Log::default();

        let inner = Arc::clone(&bus);
        let late = Arc::clone(&log);
        let mut done = false;
        bus.subscribe(SubscriptionSpec::new(OwnerId(1), EventKind::Tick), move |_, _| {
            if !done {
                done = true;
                inner.subscribe(
                    SubscriptionSpec::new(OwnerId(1), EventKind::Tick),
                    recorder(&late, "late"),
                );
            }
            Ok(())
        });

        bus.publish(&(), &mut Event::tick());
        assert!(log.lock().is_empty());
        bus.publish(&(), &mut Event::tick());
        assert_eq!(*log.lock(), ["late"]);
    }

    #[test]
    fn test_nested_publish_skips_running_handler() {
        let bus = Arc::new(EventBus::<()>::new());
        let calls = Arc::new(AtomicU64::new(0));

        let inner = Arc::clone(&bus);
        let counter = Arc::clone(&calls);
        bus.subscribe(SubscriptionSpec::new(OwnerId(1), EventKind::Tick), move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            inner.publish(&(), &mut Event::tick());
            Ok(())
        });

        bus.publish(&(), &mut Event::tick());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unsubscribe_handle() {
        let bus = EventBus::<()>::new();
        let handle = bus.subscribe(SubscriptionSpec::new(OwnerId(1), EventKind::Tick), |_, _| Ok(()));
        assert_eq!(bus.len(), 1);
        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        assert!(bus.is_empty());
    }
}
