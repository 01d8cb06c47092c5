//! Projected sample records

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::DataStatus;

/// Value of a single projected sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleValue {
    Float64(f64),
    Int32(i32),
    Bool(bool),
}

impl SampleValue {
    /// Numeric view of the value; booleans map to 0.0 / 1.0.
    pub fn as_f64(&self) -> f64 {
        match self {
            SampleValue::Float64(value) => *value,
            SampleValue::Int32(value) => f64::from(*value),
            SampleValue::Bool(value) => f64::from(u8::from(*value)),
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Float64(value) => write!(f, "{}", value),
            SampleValue::Int32(value) => write!(f, "{}", value),
            SampleValue::Bool(value) => write!(f, "{}", value),
        }
    }
}

/// One sample of one parameter with its synthesized timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub parameter: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: SampleValue,
    pub status: DataStatus,
}
