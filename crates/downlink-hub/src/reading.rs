use std::fmt;

use downlink_schema::serialize_finite;
use serde::{Serialize, Serializer};

/// A numeric signal value as published to subscribers.
///
/// Serializes like a plain JSON number except that infinities and NaN are
/// written as the strings `"Infinity"`, `"-Infinity"` and `"NaN"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Reading(pub f64);

impl Reading {
    pub const ZERO: Reading = Reading(0.0);

    pub fn get(self) -> f64 {
        self.0
    }
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Reading(value)
    }
}

impl From<Reading> for f64 {
    fn from(value: Reading) -> Self {
        value.0
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_finite(&self.0, serializer)
    }
}
