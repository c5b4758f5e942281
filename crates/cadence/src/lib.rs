//! # Cadence
//!
//! Host side of the automation core: a [`ClientSession`] owns the
//! [`Runtime`](cadence_core::Runtime), paces it at the client tick rate and
//! connects released messages to the network [`Transport`] and the local
//! [`Simulation`].
//!
//! ```rust,ignore
//! let config = SessionConfig::load("cadence.toml")?;
//! cadence::logging::init(&config.log_filter)?;
//!
//! let mut session = ClientSession::new(&config, transport, simulation);
//! let owner = session.runtime().register_owner("Blink");
//! // register behaviours ...
//! session.run_for(200)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod tick_loop;
pub mod traits;

pub use config::{ConfigError, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use session::{ClientSession, StepReport};
pub use tick_loop::{TickLoop, TickStats};
pub use traits::{MemoryTransport, RecordingSimulation, Simulation, Transport};
