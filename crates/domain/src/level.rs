//! Output level of a zone, as a percentage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A level in `0.0..=100.0`. Binary zones treat anything above zero as on.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Level(f32);

impl Level {
    pub const OFF: Self = Self(0.0);
    pub const FULL: Self = Self(100.0);

    /// Validate and wrap a raw percentage.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::LevelOutOfRange`] for values outside
    /// `0..=100` or NaN.
    pub fn new(value: f32) -> Result<Self, ValidationError> {
        if (0.0..=100.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::LevelOutOfRange(value))
        }
    }

    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }

    #[must_use]
    pub fn is_off(self) -> bool {
        self.0 <= 0.0
    }

    /// Scale onto `0..=max`, rounding to the nearest step.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn scaled(self, max: u8) -> u8 {
        (self.0 / 100.0 * f32::from(max)).round() as u8
    }
}

impl TryFrom<f32> for Level {
    type Error = ValidationError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Level> for f32 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
