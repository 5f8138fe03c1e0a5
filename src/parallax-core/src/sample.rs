//! Sample values.

use serde::{Deserialize, Serialize};

/// A single sample: a millisecond timestamp and a float value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds since the epoch.
    pub t: i64,
    /// Sample value.
    pub v: f64,
}

impl Sample {
    /// Create a new sample.
    pub const fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }
}
