//! # Events
//!
//! An [`Event`] is a tagged value of one [`EventKind`]. It is built by the
//! action that triggers it, published once, read by handlers in priority
//! order and discarded afterwards. The payload is immutable; only the
//! `cancelled` flag and the negotiation fields (interception decision,
//! movement input) may change while it is being published.
//!
//! ## Kinds
//!
//! ```text
//! Kind               Phase      Cancellation   Negotiation
//! Tick               -          advisory       -
//! PlayerTick         PRE/POST   advisory       -
//! MovementInput      -          short-circuit  MovementInput fields
//! Intercept(origin)  -          short-circuit  decision (first non-Pass)
//! Packet(origin)     -          advisory       - (decision is final)
//! WorldChange        -          advisory       -
//! ```
//!
//! A `Packet` event reports a decision already taken by the interceptors.
//! [`Event::cancel`] and [`Event::decide`] leave it untouched, so every
//! observer and every resumed sequence sees the same final state.

use std::fmt;

use cadence_shared::{Action, Message, Origin, OwnerId, Tick};

/// The observable moment of an action with two sides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the state mutation.
    Pre,
    /// After the state mutation.
    Post,
    /// The action has a single moment.
    #[default]
    None,
}

/// How cancellation interacts with the remaining handlers of a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelPolicy {
    /// A cancelled (or decided) event stops reaching lower-priority handlers.
    ShortCircuit,
    /// Every handler runs, even after cancellation.
    Advisory,
}

/// Closed set of event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// One simulation step began.
    Tick,
    /// The local player is ticked (phased).
    PlayerTick,
    /// Movement input is being assembled for this tick.
    MovementInput,
    /// Interceptors decide the fate of a message.
    Intercept(Origin),
    /// Observers see a message with its final decision.
    Packet(Origin),
    /// The world was left or replaced.
    WorldChange,
}

impl EventKind {
    /// Cancellation policy used unless a different one is declared on the bus.
    #[must_use]
    pub const fn default_policy(self) -> CancelPolicy {
        match self {
            Self::MovementInput | Self::Intercept(_) => CancelPolicy::ShortCircuit,
            Self::Tick | Self::PlayerTick | Self::Packet(_) | Self::WorldChange => {
                CancelPolicy::Advisory
            }
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tick => f.write_str("tick"),
            Self::PlayerTick => f.write_str("player_tick"),
            Self::MovementInput => f.write_str("movement_input"),
            Self::Intercept(origin) => write!(f, "intercept/{origin}"),
            Self::Packet(origin) => write!(f, "packet/{origin}"),
            Self::WorldChange => f.write_str("world_change"),
        }
    }
}

/// Movement input negotiated between handlers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MovementInput {
    /// Forward axis, -1.0 to 1.0.
    pub forward: f32,
    /// Sideways axis, -1.0 to 1.0.
    pub sideways: f32,
    /// Jump pressed.
    pub jump: bool,
    /// Sneak pressed.
    pub sneak: bool,
}

/// Kind-specific content of an event.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    /// See [`EventKind::Tick`].
    Tick,
    /// See [`EventKind::PlayerTick`].
    PlayerTick,
    /// See [`EventKind::MovementInput`].
    MovementInput(MovementInput),
    /// See [`EventKind::Intercept`].
    Intercept {
        /// Direction of the message.
        origin: Origin,
        /// The message under decision.
        message: Message,
    },
    /// See [`EventKind::Packet`].
    Packet {
        /// Direction of the message.
        origin: Origin,
        /// The decided message.
        message: Message,
    },
    /// See [`EventKind::WorldChange`].
    WorldChange,
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Tick => EventKind::Tick,
            Self::PlayerTick => EventKind::PlayerTick,
            Self::MovementInput(_) => EventKind::MovementInput,
            Self::Intercept { origin, .. } => EventKind::Intercept(*origin),
            Self::Packet { origin, .. } => EventKind::Packet(*origin),
            Self::WorldChange => EventKind::WorldChange,
        }
    }
}

/// A published event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    tick: Tick,
    phase: Phase,
    payload: EventPayload,
    cancelled: bool,
    decision: Action,
    decided_by: Option<OwnerId>,
}

impl Event {
    /// Creates an event from a payload.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            tick: Tick::ZERO,
            phase: Phase::None,
            payload,
            cancelled: false,
            decision: Action::Pass,
            decided_by: None,
        }
    }

    /// A tick event.
    #[must_use]
    pub fn tick() -> Self {
        Self::new(EventPayload::Tick)
    }

    /// A player tick event for one phase.
    #[must_use]
    pub fn player_tick(phase: Phase) -> Self {
        Self::new(EventPayload::PlayerTick).with_phase(phase)
    }

    /// A movement input negotiation event.
    #[must_use]
    pub fn movement_input(input: MovementInput) -> Self {
        Self::new(EventPayload::MovementInput(input))
    }

    /// An interception event for a message.
    #[must_use]
    pub fn intercept(origin: Origin, message: Message) -> Self {
        Self::new(EventPayload::Intercept { origin, message })
    }

    /// An observation event for a message whose decision is already taken.
    #[must_use]
    pub fn packet(origin: Origin, message: Message, decision: Action) -> Self {
        let mut event = Self::new(EventPayload::Packet { origin, message });
        event.decision = decision;
        event.cancelled = decision == Action::Cancel;
        event
    }

    /// A world change event.
    #[must_use]
    pub fn world_change() -> Self {
        Self::new(EventPayload::WorldChange)
    }

    /// Sets the phase.
    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub(crate) fn stamp(&mut self, tick: Tick) {
        self.tick = tick;
    }

    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Phase of this event.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Tick during which the event was published.
    #[must_use]
    pub const fn at(&self) -> Tick {
        self.tick
    }

    /// Kind-specific content.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Returns true once any handler cancelled the event.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Cancels the event. No effect on a [`EventKind::Packet`] event.
    pub fn cancel(&mut self) {
        if self.is_final() {
            return;
        }
        self.cancelled = true;
    }

    /// Returns true if the event reports a decision that can no longer change.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self.payload, EventPayload::Packet { .. })
    }

    /// Current interception decision.
    #[must_use]
    pub const fn decision(&self) -> Action {
        self.decision
    }

    /// Owner of the interceptor that took the current decision.
    #[must_use]
    pub const fn decided_by(&self) -> Option<OwnerId> {
        self.decided_by
    }

    /// Records an interception decision. No effect on a
    /// [`EventKind::Packet`] event.
    pub fn decide(&mut self, action: Action, owner: OwnerId) {
        if self.is_final() {
            return;
        }
        self.decision = action;
        self.decided_by = Some(owner);
        if action == Action::Cancel {
            self.cancelled = true;
        }
    }

    /// Returns true if a short-circuit kind must stop here.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.cancelled || self.decision != Action::Pass
    }

    /// Origin of a message event.
    #[must_use]
    pub const fn origin(&self) -> Option<Origin> {
        match &self.payload {
            EventPayload::Intercept { origin, .. } | EventPayload::Packet { origin, .. } => {
                Some(*origin)
            }
            _ => None,
        }
    }

    /// Message of a message event.
    #[must_use]
    pub const fn message(&self) -> Option<&Message> {
        match &self.payload {
            EventPayload::Intercept { message, .. } | EventPayload::Packet { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }

    /// Mutable movement input of a movement event.
    pub fn movement_mut(&mut self) -> Option<&mut MovementInput> {
        match &mut self.payload {
            EventPayload::MovementInput(input) => Some(input),
            _ => None,
        }
    }
}
