//! Weight reading type.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unit assumed when the scale output does not name one.
pub const DEFAULT_UNIT: &str = "g";

/// One parsed line of scale output.
///
/// Serializes as `{"raw": .., "weight": .., "unit": .., "timestamp": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    /// Line text as received (trimmed).
    pub raw: String,
    /// Numeric value, absent when the line holds no number.
    #[serde(rename = "weight")]
    pub value: Option<f64>,
    /// Unit token following the value.
    pub unit: String,
    /// Unix time in seconds when the line was parsed.
    #[serde(rename = "timestamp")]
    pub captured_at: f64,
}

impl WeightReading {
    /// Creates a reading stamped with the current time.
    #[must_use]
    pub fn new(raw: impl Into<String>, value: Option<f64>, unit: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            value,
            unit: unit.into(),
            captured_at: unix_now(),
        }
    }

    /// Returns true if the line carried a number.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
