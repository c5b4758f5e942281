//! # Cadence Core
//!
//! Tick-synchronous automation core. Many independently written behavioural
//! modules share one deterministic per-tick execution order without threads:
//!
//! - **`EventBus`**: priority-ordered publish/subscribe with owner teardown
//! - **`SequenceScheduler`**: multi-tick procedures that suspend on explicit
//!   conditions and resume exactly once per satisfied condition
//! - **`PacketPipeline`**: inbound/outbound interception with Pass, Cancel
//!   and Queue, plus FIFO flush per origin
//! - **`OutputArbitrator`**: one winning orientation request per tick
//!
//! ## Architecture Rules
//!
//! 1. **Nothing blocks** - suspending means returning to the scheduler
//! 2. **Faults are contained** - a handler, interceptor or sequence that returns
//!    `Err` is logged and counted, never propagated into the host loop
//! 3. **Owners own everything** - disabling an owner tears down all it registered
//! 4. **Faults are values, panics are bugs** - behaviour code reports failure by
//!    returning `Err`; a panic is not caught, unwinds out of `on_tick` and aborts
//!    under the release profile (`panic = "abort"`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use cadence_core::{from_fn, Runtime, Step};
//!
//! let rt = Runtime::default();
//! let owner = rt.register_owner("Blink");
//! rt.start_sequence(owner, from_fn(|cx| {
//!     // runs now, then again three ticks later
//!     Ok(Step::ticks(3))
//! }))?;
//! rt.on_tick()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arbitrator;
pub mod bus;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod owner;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod sequence;

pub use arbitrator::{ArbitrationRequest, OutputArbitrator, OutputChange, OutputConsumer, ResetPolicy};
pub use bus::{EventBus, SubscriptionHandle, SubscriptionSpec};
pub use config::{AimConfig, PipelineConfig, RuntimeConfig};
pub use diagnostics::{Diagnostics, SequenceCounts, StuckSequence};
pub use error::{CoreError, CoreResult, HandlerError, HandlerResult};
pub use event::{CancelPolicy, Event, EventKind, EventPayload, MovementInput, Phase};
pub use owner::OwnerRegistry;
pub use pipeline::{MessageSink, PacketPipeline, QueuedMessage, ReleaseBuffer, Verdict};
pub use runtime::{Runtime, TickReport};
pub use scheduler::{SequenceHandle, SequenceId, SequenceScheduler, SequenceState};
pub use sequence::{
    from_fn, Condition, EventWait, Probe, Script, Sequence, SequenceContext, StartBehavior, Step,
    Wake,
};

pub use cadence_shared::{Action, Message, Origin, OwnerId, Priority, Rotation, Tick};
