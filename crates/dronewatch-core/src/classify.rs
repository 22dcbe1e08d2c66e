//! Danger classification.
//!
//! A classifier is an ordered list of independent strategies. Every strategy
//! sees every sample; the verdict is dangerous if any of them flags it, and
//! the reasons are joined in strategy order.

use crate::models::{DangerAssessment, NoFlyZone, ObservationSample};
use crate::rules::DangerRules;

const REASON_SEPARATOR: &str = " and ";

/// One danger rule.
///
/// Returns `Some(reason)` when the sample is flagged. Implementations must
/// treat missing optional inputs as "not evaluable" and return `None`. An
/// empty reason counts as not flagged.
pub trait DangerStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, sample: &ObservationSample, zones: &[NoFlyZone]) -> Option<String>;
}

/// Flags drones flying above a height ceiling.
#[derive(Debug, Clone, Copy)]
pub struct AltitudeStrategy {
    pub max_height_m: f64,
}

impl DangerStrategy for AltitudeStrategy {
    fn name(&self) -> &'static str {
        "altitude"
    }

    fn evaluate(&self, sample: &ObservationSample, _zones: &[NoFlyZone]) -> Option<String> {
        let height = sample.height_m?;
        (height > self.max_height_m)
            .then(|| format!("Flying higher than {} meters", self.max_height_m))
    }
}

/// Flags drones moving faster than a horizontal speed limit.
#[derive(Debug, Clone, Copy)]
pub struct SpeedStrategy {
    pub max_speed_mps: f64,
}

impl DangerStrategy for SpeedStrategy {
    fn name(&self) -> &'static str {
        "speed"
    }

    fn evaluate(&self, sample: &ObservationSample, _zones: &[NoFlyZone]) -> Option<String> {
        let speed = sample.speed_mps?;
        (speed > self.max_speed_mps)
            .then(|| format!("Moving faster than {} m/s", self.max_speed_mps))
    }
}

/// Flags drones inside one or more no-fly zones, naming all of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeofenceStrategy;

impl DangerStrategy for GeofenceStrategy {
    fn name(&self) -> &'static str {
        "geofence"
    }

    fn evaluate(&self, sample: &ObservationSample, zones: &[NoFlyZone]) -> Option<String> {
        let names: Vec<&str> = zones
            .iter()
            .filter(|zone| zone.contains(sample.location))
            .map(|zone| zone.name.as_str())
            .collect();

        if names.is_empty() {
            return None;
        }
        Some(format!("Entering no fly zone: {}", names.join(", ")))
    }
}

/// Runs a fixed, ordered set of strategies and combines their findings.
pub struct DangerClassifier {
    strategies: Vec<Box<dyn DangerStrategy>>,
}

impl DangerClassifier {
    /// Altitude, speed and geofence strategies, in that order.
    pub fn new(rules: DangerRules) -> Self {
        Self::with_strategies(vec![
            Box::new(AltitudeStrategy {
                max_height_m: rules.max_height_m,
            }),
            Box::new(SpeedStrategy {
                max_speed_mps: rules.max_speed_mps,
            }),
            Box::new(GeofenceStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn DangerStrategy>>) -> Self {
        Self { strategies }
    }

    /// Append a strategy after the existing ones.
    pub fn push(&mut self, strategy: Box<dyn DangerStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Evaluate every strategy; never short-circuits.
    pub fn classify(&self, sample: &ObservationSample, zones: &[NoFlyZone]) -> DangerAssessment {
        let reasons: Vec<String> = self
            .strategies
            .iter()
            .filter_map(|strategy| strategy.evaluate(sample, zones))
            .filter(|reason| !reason.trim().is_empty())
            .collect();

        if reasons.is_empty() {
            return DangerAssessment::safe();
        }

        DangerAssessment {
            is_dangerous: true,
            reason: Some(reasons.join(REASON_SEPARATOR)),
        }
    }
}

impl Default for DangerClassifier {
    fn default() -> Self {
        Self::new(DangerRules::default())
    }
}

impl std::fmt::Debug for DangerClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DangerClassifier")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
