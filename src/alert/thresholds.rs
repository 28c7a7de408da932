//! Water-level threshold classification.
//!
//! Classification is a pure function of one number. The deployment's
//! `ThresholdPolicy` decides which number: the upstream level (flood
//! detection) or the upstream/downstream difference (blockage detection).
//! Every tier includes its lower bound.

use crate::model::{ClassifiedReading, Reading, Status, ThresholdPolicy, Tier};

/// Upstream level (cm) at or above which the canal is flooded.
pub const FLOOD_THRESHOLD_CM: f64 = 7.0;

/// Upstream level (cm) at or above which the canal is at moderate level.
pub const MODERATE_THRESHOLD_CM: f64 = 4.0;

/// Difference (cm) at or above which the channel is fully blocked.
pub const FULL_BLOCKAGE_THRESHOLD_CM: f64 = 2.5;

/// Difference (cm) at or above which a partial blockage is suspected.
pub const PARTIAL_BLOCKAGE_THRESHOLD_CM: f64 = 1.0;

impl ThresholdPolicy {
    /// Returns `(elevated, critical)` lower bounds for this policy.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            ThresholdPolicy::Absolute => (MODERATE_THRESHOLD_CM, FLOOD_THRESHOLD_CM),
            ThresholdPolicy::Differential => {
                (PARTIAL_BLOCKAGE_THRESHOLD_CM, FULL_BLOCKAGE_THRESHOLD_CM)
            }
        }
    }

    /// Classifies the value this policy watches.
    pub fn classify(&self, value: f64) -> Status {
        let (elevated, critical) = self.bounds();
        let tier = if value >= critical {
            Tier::Critical
        } else if value >= elevated {
            Tier::Elevated
        } else {
            Tier::Normal
        };
        Status::new(*self, tier)
    }

    /// Picks the policy's input field out of a reading and classifies it.
    pub fn classify_reading(&self, reading: &Reading) -> ClassifiedReading {
        let value = match self {
            ThresholdPolicy::Absolute => reading.upstream,
            ThresholdPolicy::Differential => reading.difference,
        };
        ClassifiedReading {
            reading: *reading,
            status: self.classify(value),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
