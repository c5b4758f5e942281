//! Integration tests for packet interception, queueing and release.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cadence_core::{
    from_fn, Action, EventKind, EventWait, Message, Origin, OwnerId, PipelineConfig, Priority,
    ReleaseBuffer, Runtime, RuntimeConfig, Step, SubscriptionSpec, Verdict, Wake,
};
use parking_lot::Mutex;
use proptest::prelude::*;

fn runtime_with(pipeline: PipelineConfig) -> (Runtime, Arc<ReleaseBuffer>) {
    let rt = Runtime::new(RuntimeConfig {
        pipeline,
        ..RuntimeConfig::default()
    });
    let sink = Arc::new(ReleaseBuffer::new());
    rt.set_sink(Origin::Inbound, sink.clone());
    rt.set_sink(Origin::Outbound, sink.clone());
    (rt, sink)
}

fn released_ids(sink: &ReleaseBuffer) -> Vec<u16> {
    sink.take().into_iter().map(|(_, m)| m.packet_id).collect()
}

fn queue_outbound(rt: &Runtime, name: &str) -> OwnerId {
    let owner = rt.register_owner(name);
    rt.register_interceptor(owner, Origin::Outbound, Priority::NORMAL, |_, _| Ok(Action::Queue))
        .unwrap();
    owner
}

#[test]
fn test_no_interceptor_passes() {
    let (rt, _) = runtime_with(PipelineConfig::default());
    let message = Message::new(0x1a, vec![1, 2]);
    assert_eq!(rt.on_inbound(message.clone()), Verdict::Pass(message));
}

#[test]
fn test_first_decision_in_priority_order_wins() {
    let (rt, _) = runtime_with(PipelineConfig::default());
    let owner = rt.register_owner("Blink");
    let late_calls = Arc::new(AtomicUsize::new(0));

    let calls = Arc::clone(&late_calls);
    rt.register_interceptor(owner, Origin::Outbound, Priority::NORMAL, move |_, _| {
        calls.fetch_add(1, Ordering::Relaxed);
        Ok(Action::Cancel)
    })
    .unwrap();
    rt.register_interceptor(owner, Origin::Outbound, Priority::SAFETY_FEATURE, |_, _| {
        Ok(Action::Queue)
    })
    .unwrap();

    assert_eq!(rt.on_outbound(Message::empty(3)), Verdict::Queued);
    assert_eq!(late_calls.load(Ordering::Relaxed), 0);
    assert_eq!(rt.queued(Origin::Outbound), 1);
}

#[test]
fn test_interceptor_fault_is_isolated() {
    let (rt, _) = runtime_with(PipelineConfig::default());
    let owner = rt.register_owner("Flaky");
    rt.register_interceptor(owner, Origin::Inbound, Priority::FIRST, |_, _| {
        Err("decoder exploded".into())
    })
    .unwrap();

    assert!(matches!(rt.on_inbound(Message::empty(1)), Verdict::Pass(_)));

    let other = rt.register_owner("Velocity");
    rt.register_interceptor(other, Origin::Inbound, Priority::NORMAL, |m, _| {
        Ok(if m.packet_id == 2 { Action::Cancel } else { Action::Pass })
    })
    .unwrap();
    assert_eq!(rt.on_inbound(Message::empty(2)), Verdict::Cancelled);
    assert_eq!(rt.diagnostics().faults, 2);
}

#[test]
fn test_observers_see_final_decision() {
    let (rt, _) = runtime_with(PipelineConfig::default());
    let filter = rt.register_owner("NoFall");
    let watcher = rt.register_owner("Watcher");
    let seen = Arc::new(Mutex::new(Vec::new()));

    rt.register_interceptor(filter, Origin::Outbound, Priority::NORMAL, |m, _| {
        Ok(if m.packet_id == 1 { Action::Cancel } else { Action::Pass })
    })
    .unwrap();

    let log = Arc::clone(&seen);
    rt.start_sequence(watcher, from_fn(move |cx| {
        if cx.wake() == Wake::Start {
            let wait = EventWait::new(EventKind::Packet(Origin::Outbound))
                .with_priority(Priority::FIRST);
            return Ok(Step::event(wait));
        }
        if let Some(event) = cx.event() {
            log.lock().push((event.decision(), event.is_cancelled()));
        }
        Ok(Step::Done)
    }))
    .unwrap();

    assert_eq!(rt.on_outbound(Message::empty(1)), Verdict::Cancelled);
    assert_eq!(*seen.lock(), [(Action::Cancel, true)]);
}

#[test]
fn test_observers_cannot_change_decision() {
    let (rt, _) = runtime_with(PipelineConfig::default());
    let owner = rt.register_owner("AntiBot");
    rt.subscribe(
        SubscriptionSpec::new(owner, EventKind::Packet(Origin::Inbound)),
        |event, _| {
            event.cancel();
            event.decide(Action::Queue, OwnerId(99));
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(rt.on_inbound(Message::empty(9)), Verdict::Pass(Message::empty(9)));
    assert_eq!(rt.queued(Origin::Inbound), 0);
}

#[test]
fn test_waiter_sees_same_state_as_later_observers() {
    let (rt, _) = runtime_with(PipelineConfig::default());
    let watcher = rt.register_owner("Watcher");
    let meddler = rt.register_owner("Meddler");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    rt.start_sequence(watcher, from_fn(move |cx| {
        if cx.wake() == Wake::Start {
            let wait = EventWait::new(EventKind::Packet(Origin::Outbound))
                .with_priority(Priority::FIRST);
            return Ok(Step::event(wait));
        }
        if let Some(event) = cx.event() {
            log.lock().push((event.decision(), event.is_cancelled()));
        }
        Ok(Step::Done)
    }))
    .unwrap();

    let log = Arc::clone(&seen);
    rt.subscribe(
        SubscriptionSpec::new(meddler, EventKind::Packet(Origin::Outbound))
            .with_priority(Priority::READ_FINAL_STATE),
        move |event, _| {
            event.cancel();
            log.lock().push((event.decision(), event.is_cancelled()));
            Ok(())
        },
    )
    .unwrap();

    let verdict = rt.on_outbound(Message::empty(4));
    assert_eq!(verdict, Verdict::Pass(Message::empty(4)));
    assert_eq!(*seen.lock(), [(Action::Pass, false), (Action::Pass, false)]);
}

#[test]
fn test_intercept_wait_resumes_after_every_interceptor() {
    let (rt, _) = runtime_with(PipelineConfig::default());
    let watcher = rt.register_owner("Watcher");
    let filter = rt.register_owner("NoFall");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    rt.start_sequence(watcher, from_fn(move |cx| {
        if cx.wake() == Wake::Start {
            let wait = EventWait::new(EventKind::Intercept(Origin::Outbound))
                .with_priority(Priority::FIRST);
            return Ok(Step::event(wait));
        }
        if let Some(event) = cx.event() {
            log.lock().push((event.kind(), event.decision()));
        }
        Ok(Step::Done)
    }))
    .unwrap();
    rt.register_interceptor(filter, Origin::Outbound, Priority::NOT_IMPORTANT, |_, _| {
        Ok(Action::Cancel)
    })
    .unwrap();

    assert_eq!(rt.on_outbound(Message::empty(2)), Verdict::Cancelled);
    assert_eq!(
        *seen.lock(),
        [(EventKind::Packet(Origin::Outbound), Action::Cancel)]
    );
}

#[test]
fn test_flush_is_fifo_and_idempotent() {
    let (rt, sink) = runtime_with(PipelineConfig::default());
    let owner = rt.register_owner("FakeLag");
    rt.register_interceptor(owner, Origin::Outbound, Priority::NORMAL, |m, _| {
        Ok(if m.packet_id % 2 == 0 { Action::Queue } else { Action::Pass })
    })
    .unwrap();

    let passed: Vec<u16> = (0..10)
        .filter_map(|id| rt.on_outbound(Message::empty(id)).into_passed())
        .map(|m| m.packet_id)
        .collect();
    assert_eq!(passed, [1, 3, 5, 7, 9]);

    assert_eq!(rt.flush(Origin::Outbound), 5);
    assert_eq!(released_ids(&sink), [0, 2, 4, 6, 8]);
    assert_eq!(rt.flush(Origin::Outbound), 0);
    assert!(sink.is_empty());
}

#[test]
fn test_origins_are_independent() {
    let (rt, sink) = runtime_with(PipelineConfig::default());
    let owner = rt.register_owner("Both");
    for origin in Origin::ALL {
        rt.register_interceptor(owner, origin, Priority::NORMAL, |_, _| Ok(Action::Queue))
            .unwrap();
    }
    rt.on_inbound(Message::empty(1));
    rt.on_outbound(Message::empty(2));

    rt.flush(Origin::Inbound);
    assert_eq!(sink.take(), [(Origin::Inbound, Message::empty(1))]);
    assert_eq!(rt.queued(Origin::Outbound), 1);
}

#[test]
fn test_hold_lapses_after_max_ticks() {
    let (rt, sink) = runtime_with(PipelineConfig {
        max_hold_ticks: 3,
        ..PipelineConfig::default()
    });
    queue_outbound(&rt, "Freeze");
    rt.on_outbound(Message::empty(1));
    rt.on_outbound(Message::empty(2));

    assert_eq!(rt.on_tick().unwrap().released, 0);
    assert_eq!(rt.on_tick().unwrap().released, 0);
    assert_eq!(rt.on_tick().unwrap().released, 2);
    assert_eq!(released_ids(&sink), [1, 2]);
}

#[test]
fn test_disabled_holder_released_at_end_of_tick() {
    let (rt, sink) = runtime_with(PipelineConfig::default());
    let owner = queue_outbound(&rt, "Blink");
    rt.on_outbound(Message::empty(5));
    rt.on_outbound(Message::empty(6));

    rt.disable_owner(owner).unwrap();
    assert_eq!(rt.queued(Origin::Outbound), 2);
    assert!(matches!(rt.on_outbound(Message::empty(7)), Verdict::Pass(_)));

    let report = rt.on_tick().unwrap();
    assert_eq!(report.released, 2);
    assert_eq!(released_ids(&sink), [5, 6]);
}

#[test]
fn test_full_queue_is_released_before_queueing() {
    let (rt, sink) = runtime_with(PipelineConfig {
        queue_capacity: 2,
        ..PipelineConfig::default()
    });
    queue_outbound(&rt, "Blink");
    for id in 0..3 {
        assert_eq!(rt.on_outbound(Message::empty(id)), Verdict::Queued);
    }
    assert_eq!(released_ids(&sink), [0, 1]);
    assert_eq!(rt.queued(Origin::Outbound), 1);
}

#[test]
fn test_flush_without_sink_keeps_messages() {
    let rt = Runtime::default();
    queue_outbound(&rt, "Blink");
    rt.on_outbound(Message::empty(1));
    rt.on_outbound(Message::empty(2));

    assert_eq!(rt.flush(Origin::Outbound), 2);
    assert_eq!(rt.queued(Origin::Outbound), 0);
    let unclaimed: Vec<_> = rt
        .take_unclaimed()
        .into_iter()
        .map(|(origin, m)| (origin, m.packet_id))
        .collect();
    assert_eq!(unclaimed, [(Origin::Outbound, 1), (Origin::Outbound, 2)]);
    assert!(rt.take_unclaimed().is_empty());
}

#[test]
fn test_lapsed_release_without_sink_keeps_messages() {
    let rt = Runtime::new(RuntimeConfig {
        pipeline: PipelineConfig {
            max_hold_ticks: 1,
            ..PipelineConfig::default()
        },
        ..RuntimeConfig::default()
    });
    queue_outbound(&rt, "Blink");
    rt.on_outbound(Message::empty(5));

    assert_eq!(rt.on_tick().unwrap().released, 1);
    assert_eq!(rt.take_unclaimed().len(), 1);
}

#[test]
fn test_sequence_holds_then_flushes() {
    let (rt, sink) = runtime_with(PipelineConfig::default());
    let owner = rt.register_owner("Blink");
    let mut handle = None;

    rt.start_sequence(owner, from_fn(move |cx| {
        if cx.wake() == Wake::Start {
            handle = Some(cx.runtime().register_interceptor(
                cx.owner(),
                Origin::Outbound,
                Priority::NORMAL,
                |_, _| Ok(Action::Queue),
            )?);
            return Ok(Step::ticks(4));
        }
        if let Some(handle) = handle.take() {
            cx.runtime().unsubscribe(handle);
        }
        cx.runtime().flush(Origin::Outbound);
        Ok(Step::Done)
    }))
    .unwrap();

    for tick in 1..=5u16 {
        rt.on_outbound(Message::empty(tick));
        rt.on_tick().unwrap();
        if tick < 4 {
            assert!(sink.is_empty());
        }
    }
    assert_eq!(released_ids(&sink), [1, 2, 3, 4]);
    assert_eq!(rt.queued(Origin::Outbound), 0);
}

fn decision_strategy() -> impl Strategy<Value = Vec<(usize, Action)>> {
    let action = prop_oneof![Just(Action::Pass), Just(Action::Cancel), Just(Action::Queue)];
    prop::collection::vec((0usize..3, action), 0..64)
}

proptest! {
    /// Whatever mix of decisions several interceptors take, queued messages
    /// come out in arrival order.
    #[test]
    fn flush_preserves_queue_order(decisions in decision_strategy()) {
        let (rt, sink) = runtime_with(PipelineConfig::default());
        let table = Arc::new(decisions.clone());

        for (index, priority) in [Priority(30), Priority(20), Priority(10)].into_iter().enumerate() {
            let owner = rt.register_owner(format!("interceptor-{index}"));
            let table = Arc::clone(&table);
            rt.register_interceptor(owner, Origin::Inbound, priority, move |m, _| {
                let (who, action) = table[usize::from(m.packet_id)];
                Ok(if who == index { action } else { Action::Pass })
            })
            .unwrap();
        }

        let mut expected = Vec::new();
        for (id, (_, action)) in decisions.iter().enumerate() {
            let id = u16::try_from(id).unwrap();
            let verdict = rt.on_inbound(Message::empty(id));
            match action {
                Action::Pass => prop_assert_eq!(verdict, Verdict::Pass(Message::empty(id))),
                Action::Cancel => prop_assert_eq!(verdict, Verdict::Cancelled),
                Action::Queue => {
                    prop_assert_eq!(verdict, Verdict::Queued);
                    expected.push(id);
                }
            }
        }

        prop_assert_eq!(rt.flush(Origin::Inbound), expected.len());
        prop_assert_eq!(released_ids(&sink), expected);
    }
}
