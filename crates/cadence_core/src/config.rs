//! Runtime configuration.
//!
//! Every field has a default, so an empty TOML table is a valid config.
//! The host crate owns file loading; this module only defines the shape.

use serde::Deserialize;

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Suspension age (in ticks) after which a sequence is reported as stuck.
    /// `0` disables the check.
    pub stuck_sequence_ticks: u64,
    /// Interception pipeline settings.
    pub pipeline: PipelineConfig,
    /// Orientation consumer settings.
    pub aim: AimConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stuck_sequence_ticks: 200, // 10s at 20Hz
            pipeline: PipelineConfig::default(),
            aim: AimConfig::default(),
        }
    }
}

/// Interception pipeline settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pre-allocated capacity of each origin queue. A full queue is flushed
    /// before the next message is queued.
    pub queue_capacity: usize,
    /// Release a queued origin at end of tick once its oldest message has
    /// been held this many ticks. `0` holds until flushed.
    pub max_hold_ticks: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_hold_ticks: 0,
        }
    }
}

/// Orientation consumer settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AimConfig {
    /// Hand orientation back to the player after this many ticks without a
    /// request. `0` keeps the last value forever.
    pub reset_after_ticks: u32,
}

impl Default for AimConfig {
    fn default() -> Self {
        Self {
            reset_after_ticks: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_is_default() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            stuck_sequence_ticks = 40

            [pipeline]
            max_hold_ticks = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.stuck_sequence_ticks, 40);
        assert_eq!(config.pipeline.max_hold_ticks, 12);
        assert_eq!(config.pipeline.queue_capacity, 256);
        assert_eq!(config.aim.reset_after_ticks, 5);
    }
}
