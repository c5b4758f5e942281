//! # Client Session
//!
//! Drives the automation core from the client's main thread.
//!
//! ```text
//! network threads ──Message──▶ inbound channel ─┐
//!                                               ▼
//! step(): on_tick ─▶ orientation ─▶ PlayerTick Pre ─▶ MovementInput
//!         ─▶ Simulation::advance ─▶ PlayerTick Post ─▶ drain inbound
//!
//! send(): outbound pipeline ─▶ Transport
//! ```
//!
//! Held messages released during `on_tick` reach the simulation before any
//! message received since the last step is evaluated.

use std::sync::Arc;

use cadence_core::{
    Event, EventPayload, MessageSink, MovementInput, OutputChange, Phase, Runtime, TickReport,
    Verdict,
};
use cadence_shared::{Message, Origin};
use crossbeam_channel::{Receiver, Sender};

use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::tick_loop::{TickLoop, TickStats};
use crate::traits::{Simulation, Transport};

/// Forwards released outbound messages to the transport.
struct TransportSink<T>(Arc<T>);

impl<T: Transport> MessageSink for TransportSink<T> {
    fn deliver(&self, _origin: Origin, message: Message) {
        self.0.send(message);
    }
}

/// Forwards released inbound messages to the simulation.
struct SimulationSink<S>(Arc<S>);

impl<S: Simulation> MessageSink for SimulationSink<S> {
    fn deliver(&self, _origin: Origin, message: Message) {
        self.0.apply(message);
    }
}

/// What one [`ClientSession::step`] did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    /// Core tick report.
    pub tick: TickReport,
    /// Movement input the simulation advanced with.
    pub input: MovementInput,
    /// Inbound messages evaluated this step.
    pub inbound: usize,
    /// Inbound messages applied immediately.
    pub applied: usize,
}

/// A running client connected to the automation core.
pub struct ClientSession<T: Transport + 'static, S: Simulation + 'static> {
    runtime: Runtime,
    transport: Arc<T>,
    simulation: Arc<S>,
    inbound_tx: Sender<Message>,
    inbound_rx: Receiver<Message>,
    tick_loop: TickLoop,
}

impl<T: Transport + 'static, S: Simulation + 'static> ClientSession<T, S> {
    /// Creates a session and routes released messages to the collaborators.
    pub fn new(config: &SessionConfig, transport: Arc<T>, simulation: Arc<S>) -> Self {
        let runtime = Runtime::new(config.runtime.clone());
        runtime.set_sink(Origin::Inbound, Arc::new(SimulationSink(Arc::clone(&simulation))));
        runtime.set_sink(Origin::Outbound, Arc::new(TransportSink(Arc::clone(&transport))));
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();

        tracing::info!(tick_rate = config.tick_rate, "client session created");
        Self {
            runtime,
            transport,
            simulation,
            inbound_tx,
            inbound_rx,
            tick_loop: TickLoop::new(config.tick_rate),
        }
    }

    /// The automation core. Behaviours register against this.
    #[must_use]
    pub const fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Sender for network threads. Messages are evaluated on the next step.
    #[must_use]
    pub fn inbound(&self) -> Sender<Message> {
        self.inbound_tx.clone()
    }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The simulation.
    #[must_use]
    pub fn simulation(&self) -> &Arc<S> {
        &self.simulation
    }

    /// Runs a message through the outbound pipeline and sends it if it passed.
    pub fn send(&self, message: Message) -> Verdict {
        let verdict = self.runtime.on_outbound(message);
        if let Verdict::Pass(message) = &verdict {
            self.transport.send(message.clone());
        }
        verdict
    }

    /// Tells every behaviour the world was left or replaced.
    pub fn change_world(&self) {
        self.runtime.publish(Event::world_change());
    }

    /// Runs one client tick.
    ///
    /// # Errors
    ///
    /// Fails only if called re-entrantly from inside a tick.
    pub fn step(&self) -> SessionResult<StepReport> {
        let tick = self.runtime.on_tick()?;
        match tick.aim {
            OutputChange::Set(rotation) => self.simulation.set_orientation(Some(rotation)),
            OutputChange::Reset => self.simulation.set_orientation(None),
            OutputChange::Unchanged => {}
        }

        self.runtime.publish(Event::player_tick(Phase::Pre));
        let input = self.negotiate_movement();
        self.simulation.advance(tick.tick, input);
        self.runtime.publish(Event::player_tick(Phase::Post));

        let mut inbound = 0;
        let mut applied = 0;
        for message in self.inbound_rx.try_iter() {
            inbound += 1;
            if let Verdict::Pass(message) = self.runtime.on_inbound(message) {
                self.simulation.apply(message);
                applied += 1;
            }
        }

        Ok(StepReport {
            tick,
            input,
            inbound,
            applied,
        })
    }

    /// Runs `ticks` steps paced by the fixed-timestep loop.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step.
    pub fn run_for(&mut self, ticks: u64) -> SessionResult<()> {
        let mut executed = 0;
        while executed < ticks {
            if !self.tick_loop.is_due() {
                self.tick_loop.sleep_until_due();
                continue;
            }
            let started = self.tick_loop.begin();
            self.step()?;
            self.tick_loop.finish(started);
            executed += 1;
        }

        let stats = self.tick_loop.stats();
        tracing::debug!(
            steps = executed,
            avg_us = u64::try_from(stats.average.as_micros()).unwrap_or(u64::MAX),
            late = stats.late,
            "session run finished"
        );
        Ok(())
    }

    /// Step timing statistics.
    #[must_use]
    pub const fn tick_stats(&self) -> &TickStats {
        self.tick_loop.stats()
    }

    fn negotiate_movement(&self) -> MovementInput {
        let event = self
            .runtime
            .publish(Event::movement_input(self.simulation.movement()));
        if event.is_cancelled() {
            return MovementInput::default();
        }
        match event.payload() {
            EventPayload::MovementInput(input) => *input,
            _ => MovementInput::default(),
        }
    }
}
