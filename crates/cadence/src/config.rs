//! Session configuration, loaded once at startup.
//!
//! ```toml
//! tick_rate = 20
//! log_filter = "info,cadence_core=debug"
//!
//! [runtime]
//! stuck_sequence_ticks = 200
//!
//! [runtime.pipeline]
//! max_hold_ticks = 40
//! ```

use std::path::Path;

use cadence_core::RuntimeConfig;
use cadence_shared::TICKS_PER_SECOND;
use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The content is not valid TOML for this shape.
    #[error("failed to parse config: {source}")]
    Parse {
        /// Underlying TOML error.
        #[from]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Host-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Simulation steps per second.
    pub tick_rate: u32,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Core settings.
    pub runtime: RuntimeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICKS_PER_SECOND,
            log_filter: "info".to_owned(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed input, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`SessionConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate must be within 1..=1000, got {}",
                self.tick_rate
            )));
        }
        Ok(())
    }
}
