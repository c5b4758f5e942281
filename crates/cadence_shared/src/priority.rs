//! # Priorities
//!
//! One totally ordered priority type serves both event subscriptions and
//! orientation requests. Higher values run first / win.
//!
//! ## Conventions
//!
//! ```text
//! Event handlers                   Orientation requests
//! FIRST             1000           IMPORTANT_FOR_PLAYER_LIFE   40
//! SAFETY_FEATURE     100           IMPORTANT_FOR_USAGE_3       30
//! MODEL_STATE         50           IMPORTANT_FOR_USAGE_2       20
//! NORMAL               0           IMPORTANT_FOR_USAGE_1       10
//! READ_FINAL_STATE -1000           NOT_IMPORTANT              -10
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Signed, totally ordered priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i16);

impl Priority {
    /// Runs before everything else, e.g. bookkeeping that others read.
    pub const FIRST: Self = Self(1000);
    /// Features that protect the player and must see events early.
    pub const SAFETY_FEATURE: Self = Self(100);
    /// Handlers that build model state other handlers depend on.
    pub const MODEL_STATE: Self = Self(50);
    /// Default priority.
    pub const NORMAL: Self = Self(0);
    /// Observers that must see the final, fully negotiated event.
    pub const READ_FINAL_STATE: Self = Self(-1000);

    /// Cosmetic orientation requests that anything may override.
    pub const NOT_IMPORTANT: Self = Self(-10);
    /// Orientation needed to use something (lowest tier).
    pub const IMPORTANT_FOR_USAGE_1: Self = Self(10);
    /// Orientation needed to use something (middle tier).
    pub const IMPORTANT_FOR_USAGE_2: Self = Self(20);
    /// Orientation needed to use something (highest tier).
    pub const IMPORTANT_FOR_USAGE_3: Self = Self(30);
    /// Orientation that keeps the player alive.
    pub const IMPORTANT_FOR_PLAYER_LIFE: Self = Self(40);
}

impl From<i16> for Priority {
    fn from(value: i16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conventions_are_ordered() {
        assert!(Priority::FIRST > Priority::SAFETY_FEATURE);
        assert!(Priority::SAFETY_FEATURE > Priority::MODEL_STATE);
        assert!(Priority::MODEL_STATE > Priority::NORMAL);
        assert!(Priority::NORMAL > Priority::READ_FINAL_STATE);

        assert!(Priority::IMPORTANT_FOR_PLAYER_LIFE > Priority::IMPORTANT_FOR_USAGE_3);
        assert!(Priority::IMPORTANT_FOR_USAGE_1 > Priority::NOT_IMPORTANT);
    }
}
