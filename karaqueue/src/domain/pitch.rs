//! Pitch shift value object.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// A pitch shift in semitones, bounded to one octave either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct PitchShift(i8);

impl PitchShift {
    pub const MIN: i32 = -12;
    pub const MAX: i32 = 12;

    /// Validate a raw semitone value.
    pub fn new(semitones: i32) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&semitones) {
            return Err(Error::InvalidPitchShift {
                value: semitones,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        Ok(Self(semitones as i8))
    }

    pub fn semitones(self) -> i32 {
        i32::from(self.0)
    }

    /// Shift in cents, the unit `sox pitch` expects.
    pub fn cents(self) -> i32 {
        self.semitones() * 100
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<i32> for PitchShift {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PitchShift> for i32 {
    fn from(value: PitchShift) -> Self {
        value.semitones()
    }
}

impl fmt::Display for PitchShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.0)
    }
}
