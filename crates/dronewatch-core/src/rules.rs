//! Safety thresholds used by the danger classifier.

use serde::{Deserialize, Serialize};

/// Thresholds for danger classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DangerRules {
    /// Height above which a drone is flagged (meters, exclusive)
    pub max_height_m: f64,
    /// Horizontal speed above which a drone is flagged (m/s, exclusive)
    pub max_speed_mps: f64,
}

impl Default for DangerRules {
    fn default() -> Self {
        Self {
            max_height_m: 500.0,
            max_speed_mps: 10.0,
        }
    }
}
