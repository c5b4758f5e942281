//! # Host Traits
//!
//! What the client must provide for a [`ClientSession`](crate::ClientSession)
//! to drive it.
//!
//! ```text
//! ClientSession ──send──▶ Transport      (network writer)
//!       │
//!       └──advance/apply──▶ Simulation   (local world model)
//! ```
//!
//! Both are shared with the release sinks, so methods take `&self`.

use cadence_core::MovementInput;
use cadence_shared::{Message, Rotation, Tick};
use parking_lot::Mutex;

// ============================================================================
// TRANSPORT
// ============================================================================

/// Writes messages to the server.
pub trait Transport: Send + Sync {
    /// Sends one message. Must not block the session thread.
    fn send(&self, message: Message);
}

// ============================================================================
// SIMULATION
// ============================================================================

/// The client's local simulation.
pub trait Simulation: Send + Sync {
    /// Raw player input for the coming step.
    fn movement(&self) -> MovementInput;

    /// Advances one step with the negotiated input.
    fn advance(&self, tick: Tick, input: MovementInput);

    /// Applies a message received from the server.
    fn apply(&self, message: Message);

    /// Overrides the view orientation; `None` returns control to the player.
    fn set_orientation(&self, rotation: Option<Rotation>);
}

// ============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ============================================================================

/// Transport that records everything it is asked to send.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<Message>>,
}

impl MemoryTransport {
    /// Empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Packet ids sent so far.
    #[must_use]
    pub fn sent_ids(&self) -> Vec<u16> {
        self.sent.lock().iter().map(|m| m.packet_id).collect()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: Message) {
        self.sent.lock().push(message);
    }
}

#[derive(Debug, Default)]
struct WorldState {
    input: MovementInput,
    steps: Vec<(Tick, MovementInput)>,
    applied: Vec<Message>,
    orientation: Option<Rotation>,
    orientation_changes: usize,
}

/// Simulation that records what the session did to it.
#[derive(Debug, Default)]
pub struct RecordingSimulation {
    state: Mutex<WorldState>,
}

impl RecordingSimulation {
    /// Simulation with no input held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw player input reported from now on.
    pub fn hold_input(&self, input: MovementInput) {
        self.state.lock().input = input;
    }

    /// Every step taken, with the input it used.
    #[must_use]
    pub fn steps(&self) -> Vec<(Tick, MovementInput)> {
        self.state.lock().steps.clone()
    }

    /// Inbound messages applied, oldest first.
    #[must_use]
    pub fn applied(&self) -> Vec<Message> {
        self.state.lock().applied.clone()
    }

    /// Packet ids of applied messages.
    #[must_use]
    pub fn applied_ids(&self) -> Vec<u16> {
        self.state.lock().applied.iter().map(|m| m.packet_id).collect()
    }

    /// Current orientation override.
    #[must_use]
    pub fn orientation(&self) -> Option<Rotation> {
        self.state.lock().orientation
    }

    /// How often the orientation override was changed.
    #[must_use]
    pub fn orientation_changes(&self) -> usize {
        self.state.lock().orientation_changes
    }
}

impl Simulation for RecordingSimulation {
    fn movement(&self) -> MovementInput {
        self.state.lock().input
    }

    fn advance(&self, tick: Tick, input: MovementInput) {
        self.state.lock().steps.push((tick, input));
    }

    fn apply(&self, message: Message) {
        self.state.lock().applied.push(message);
    }

    fn set_orientation(&self, rotation: Option<Rotation>) {
        let mut state = self.state.lock();
        state.orientation = rotation;
        state.orientation_changes += 1;
    }
}
