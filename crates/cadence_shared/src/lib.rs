//! # Cadence Shared
//!
//! Common types used by the automation core and by the host integration.
//!
//! ## CRITICAL RULE
//!
//! This crate holds plain data only. Nothing in here knows about
//! subscriptions, sequences or queues; that lives in `cadence_core`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod math;
pub mod priority;
pub mod protocol;

pub use constants::{TICKS_PER_SECOND, TICK_DURATION_MICROS};
pub use ids::{OwnerId, Tick};
pub use math::Rotation;
pub use priority::Priority;
pub use protocol::{Action, Message, Origin};
