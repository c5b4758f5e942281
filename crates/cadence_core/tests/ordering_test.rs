//! Integration tests for handler ordering, owner teardown and aim
//! arbitration across a tick.

use std::cmp::Reverse;
use std::sync::Arc;

use cadence_core::{
    from_fn, AimConfig, Event, EventKind, OutputChange, Phase, Priority, Rotation, Runtime,
    RuntimeConfig, Step, SubscriptionSpec, Tick, Wake,
};
use parking_lot::Mutex;
use proptest::prelude::*;

proptest! {
    /// Handlers run in descending priority, ties in registration order.
    #[test]
    fn handlers_follow_priority_then_registration(priorities in prop::collection::vec(-50i16..50, 1..24)) {
        let rt = Runtime::default();
        let owner = rt.register_owner("Many");
        let fired = Arc::new(Mutex::new(Vec::new()));

        for (index, priority) in priorities.iter().enumerate() {
            let log = Arc::clone(&fired);
            let spec = SubscriptionSpec::new(owner, EventKind::Tick).with_priority(Priority(*priority));
            rt.subscribe(spec, move |_, _| {
                log.lock().push(index);
                Ok(())
            })
            .unwrap();
        }

        rt.publish(Event::tick());

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|&index| Reverse(priorities[index]));
        prop_assert_eq!(fired.lock().clone(), expected);
    }
}

#[test]
fn test_phased_events_reach_matching_handlers() {
    let rt = Runtime::default();
    let owner = rt.register_owner("Phased");
    let fired = Arc::new(Mutex::new(Vec::new()));

    for phase in [Phase::Pre, Phase::Post] {
        let log = Arc::clone(&fired);
        rt.subscribe(
            SubscriptionSpec::new(owner, EventKind::PlayerTick).with_phase(phase),
            move |event, _| {
                log.lock().push(event.phase());
                Ok(())
            },
        )
        .unwrap();
    }

    rt.publish(Event::player_tick(Phase::Pre));
    rt.publish(Event::player_tick(Phase::Post));
    assert_eq!(*fired.lock(), [Phase::Pre, Phase::Post]);
}

#[test]
fn test_disable_during_publish_skips_remaining_handlers() {
    let rt = Runtime::default();
    let killer = rt.register_owner("Killer");
    let victim = rt.register_owner("Victim");
    let fired = Arc::new(Mutex::new(Vec::new()));

    rt.subscribe(
        SubscriptionSpec::new(killer, EventKind::Tick).with_priority(Priority::FIRST),
        move |_, rt| {
            rt.disable_owner(victim)?;
            Ok(())
        },
    )
    .unwrap();
    let log = Arc::clone(&fired);
    rt.subscribe(SubscriptionSpec::new(victim, EventKind::Tick), move |_, _| {
        log.lock().push("victim");
        Ok(())
    })
    .unwrap();

    rt.on_tick().unwrap();
    rt.on_tick().unwrap();
    assert!(fired.lock().is_empty());
    assert_eq!(rt.diagnostics().subscriptions, 1);
}

#[test]
fn test_event_waits_interleave_with_handlers() {
    let rt = Runtime::default();
    let owner = rt.register_owner("Interleaved");
    let fired = Arc::new(Mutex::new(Vec::new()));

    for (name, priority) in [("high", Priority::FIRST), ("low", Priority::READ_FINAL_STATE)] {
        let log = Arc::clone(&fired);
        rt.subscribe(
            SubscriptionSpec::new(owner, EventKind::WorldChange).with_priority(priority),
            move |_, _| {
                log.lock().push(name);
                Ok(())
            },
        )
        .unwrap();
    }

    let log = Arc::clone(&fired);
    rt.start_sequence(owner, from_fn(move |cx| {
        if cx.wake() == Wake::Start {
            return Ok(Step::event(cadence_core::EventWait::new(EventKind::WorldChange)));
        }
        log.lock().push("sequence");
        Ok(Step::Done)
    }))
    .unwrap();

    rt.publish(Event::world_change());
    assert_eq!(*fired.lock(), ["high", "sequence", "low"]);
}

#[test]
fn test_highest_priority_latest_submission_wins() {
    let rt = Runtime::default();
    let a = rt.register_owner("A");
    let b = rt.register_owner("B");
    let c = rt.register_owner("C");

    rt.submit_aim(a, Rotation::new(10.0, 0.0), Priority(1)).unwrap();
    rt.submit_aim(b, Rotation::new(20.0, 0.0), Priority(5)).unwrap();
    rt.submit_aim(c, Rotation::new(30.0, 0.0), Priority(5)).unwrap();

    let report = rt.on_tick().unwrap();
    assert_eq!(report.aim, OutputChange::Set(Rotation::new(30.0, 0.0)));
    assert_eq!(rt.aim(), Some(Rotation::new(30.0, 0.0)));
}

#[test]
fn test_resolution_sees_sequence_requests_of_the_tick() {
    let rt = Runtime::default();
    let handler_owner = rt.register_owner("Handler");
    let sequence_owner = rt.register_owner("Sequence");

    rt.subscribe(SubscriptionSpec::new(handler_owner, EventKind::Tick), move |_, rt| {
        rt.submit_aim(handler_owner, Rotation::new(1.0, 0.0), Priority::NOT_IMPORTANT)?;
        Ok(())
    })
    .unwrap();
    rt.start_sequence(sequence_owner, from_fn(move |cx| {
        if cx.wake() == Wake::Start {
            return Ok(Step::ticks(2));
        }
        cx.runtime()
            .submit_aim(cx.owner(), Rotation::new(2.0, 0.0), Priority::IMPORTANT_FOR_PLAYER_LIFE)?;
        Ok(Step::Done)
    }))
    .unwrap();

    let first = rt.on_tick().unwrap();
    assert_eq!(first.aim, OutputChange::Set(Rotation::new(1.0, 0.0)));
    let second = rt.on_tick().unwrap();
    assert_eq!(second.aim, OutputChange::Set(Rotation::new(2.0, 0.0)));
}

#[test]
fn test_aim_resets_after_idle_ticks() {
    let rt = Runtime::default();
    let owner = rt.register_owner("Aim");
    rt.submit_aim(owner, Rotation::new(45.0, -10.0), Priority::IMPORTANT_FOR_USAGE_1)
        .unwrap();

    let changes: Vec<_> = (0..7).map(|_| rt.on_tick().unwrap()).collect();
    assert_eq!(changes[0].aim, OutputChange::Set(Rotation::new(45.0, -10.0)));
    for report in &changes[1..5] {
        assert_eq!(report.aim, OutputChange::Unchanged, "{:?}", report.tick);
    }
    assert_eq!(changes[5].tick, Tick(6));
    assert_eq!(changes[5].aim, OutputChange::Reset);
    assert_eq!(changes[6].aim, OutputChange::Unchanged);
    assert_eq!(rt.aim(), None);
}

#[test]
fn test_sticky_aim_keeps_last_value() {
    let rt = Runtime::new(RuntimeConfig {
        aim: AimConfig { reset_after_ticks: 0 },
        ..RuntimeConfig::default()
    });
    let owner = rt.register_owner("Aim");
    rt.submit_aim(owner, Rotation::new(5.0, 5.0), Priority::NORMAL).unwrap();

    for _ in 0..20 {
        rt.on_tick().unwrap();
    }
    assert_eq!(rt.aim(), Some(Rotation::new(5.0, 5.0)));
}
