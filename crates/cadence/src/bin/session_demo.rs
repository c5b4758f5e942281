//! Scripted client session over an in-memory transport.
//!
//! ```text
//! cargo run --bin session_demo -- [config.toml]
//! ```
//!
//! Three behaviours run side by side:
//! - `Blink` holds outbound movement for 10 ticks, then releases it in order
//! - `AimAssist` tracks a moving target between ticks 20 and 40
//! - `AutoSneak` forces sneaking while the aim is held

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cadence::{ClientSession, MemoryTransport, RecordingSimulation, SessionConfig};
use cadence_core::{
    from_fn, EventKind, Runtime, Script, Step, SubscriptionHandle, SubscriptionSpec,
};
use cadence_shared::{Action, Message, Origin, Priority, Rotation};
use parking_lot::Mutex;

const MOVE_PACKET: u16 = 0x1D;
const CHAT_PACKET: u16 = 0x05;
const ENTITY_PACKET: u16 = 0x40;
const SESSION_TICKS: u64 = 60;
const EYE: [f32; 3] = [0.0, 1.62, 0.0];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    cadence::logging::init(&config.log_filter)?;

    let transport = Arc::new(MemoryTransport::new());
    let simulation = Arc::new(RecordingSimulation::new());
    let mut session = ClientSession::new(&config, Arc::clone(&transport), Arc::clone(&simulation));

    install_blink(session.runtime())?;
    install_aim_assist(session.runtime())?;
    install_auto_sneak(session.runtime())?;

    let inbound = session.inbound();
    let network = thread::spawn(move || {
        for i in 0..SESSION_TICKS {
            let payload = i.to_le_bytes().to_vec();
            if inbound.send(Message::new(ENTITY_PACKET, payload)).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
    });

    for i in 0..SESSION_TICKS {
        session.send(Message::new(MOVE_PACKET, i.to_le_bytes().to_vec()));
        if i % 20 == 0 {
            session.send(Message::new(CHAT_PACKET, b"hello".to_vec()));
        }
        session.run_for(1)?;
    }
    if network.join().is_err() {
        tracing::warn!("network thread panicked");
    }

    let stats = session.tick_stats();
    tracing::info!(
        sent = transport.sent().len(),
        applied = simulation.applied().len(),
        orientation_changes = simulation.orientation_changes(),
        late_ticks = stats.late,
        "session finished"
    );
    tracing::info!("{}", session.runtime().diagnostics());
    Ok(())
}

/// Holds outbound movement for 10 ticks, then releases it.
fn install_blink(rt: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let owner = rt.register_owner("Blink");
    let interceptor: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::default();
    let installed = Arc::clone(&interceptor);

    let script = Script::new()
        .then(move |cx| {
            let handle = cx.runtime().register_interceptor(
                cx.owner(),
                Origin::Outbound,
                Priority::NORMAL,
                |message, _| {
                    Ok(if message.packet_id == MOVE_PACKET {
                        Action::Queue
                    } else {
                        Action::Pass
                    })
                },
            )?;
            *installed.lock() = Some(handle);
            cx.on_cancel(move |rt| {
                rt.unsubscribe(handle);
                rt.flush(Origin::Outbound);
            });
            tracing::info!(tick = %cx.tick(), "blink started");
            Ok(())
        })
        .wait_ticks(10)
        .then(move |cx| {
            if let Some(handle) = interceptor.lock().take() {
                cx.runtime().unsubscribe(handle);
            }
            let released = cx.runtime().flush(Origin::Outbound);
            cx.clear_on_cancel();
            tracing::info!(tick = %cx.tick(), released, "blink released");
            Ok(())
        });

    rt.start_sequence(owner, script)?;
    Ok(())
}

/// Looks at a target circling the player between ticks 20 and 40.
fn install_aim_assist(rt: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let owner = rt.register_owner("AimAssist");
    rt.tick_sequence(owner, || {
        from_fn(|cx| {
            let tick = cx.tick().0;
            if (20..40).contains(&tick) {
                #[allow(clippy::cast_precision_loss)]
                let angle = tick as f32 * 0.2;
                let target = [angle.cos() * 4.0, 1.0, angle.sin() * 4.0];
                cx.runtime().submit_aim(
                    cx.owner(),
                    Rotation::looking_at(EYE, target),
                    Priority::IMPORTANT_FOR_USAGE_1,
                )?;
            }
            Ok(Step::Done)
        })
    })?;
    Ok(())
}

/// Forces sneaking while an orientation override is applied.
fn install_auto_sneak(rt: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let owner = rt.register_owner("AutoSneak");
    let spec = SubscriptionSpec::new(owner, EventKind::MovementInput).with_priority(Priority::NOT_IMPORTANT);
    rt.subscribe(spec, |event, rt| {
        if rt.aim().is_some() {
            if let Some(input) = event.movement_mut() {
                input.sneak = true;
            }
        }
        Ok(())
    })?;
    Ok(())
}
