//! Evidentiary gating of the aggregator's call against detection volume.

use crashwatch_models::{AggregationResult, AnalysisStatus};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_gate_config"))]
pub struct GateConfig {
    /// Below this many vehicle detections the call is rejected
    pub min_vehicles: usize,
    /// Above this many vehicle detections an accepted call is boosted
    pub boost_vehicles: usize,
    #[validate(range(min = 1.0))]
    pub boost_factor: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub boost_cap: f64,
    /// Confidence ceiling when vehicles are present but sparse
    #[validate(range(min = 0.0, max = 1.0))]
    pub sparse_confidence_cap: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_vehicles: 5,
            boost_vehicles: 10,
            boost_factor: 1.1,
            boost_cap: 0.99,
            sparse_confidence_cap: 0.3,
        }
    }
}

fn validate_gate_config(config: &GateConfig) -> Result<(), ValidationError> {
    if config.min_vehicles > config.boost_vehicles {
        let mut err = ValidationError::new("gate_thresholds");
        err.message = Some("min_vehicles must not exceed boost_vehicles".into());
        return Err(err);
    }
    Ok(())
}

/// Which gate rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    /// No vehicle detections at all
    NoVehicles,
    /// Some vehicles, fewer than the minimum
    SparseVehicles,
    /// Raw accident flag accepted as is
    Accepted,
    /// Raw accident flag accepted and confidence boosted
    Boosted,
    /// Enough vehicles, but the aggregator found no accident
    Rejected,
}

impl GateRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateRule::NoVehicles => "no_vehicles",
            GateRule::SparseVehicles => "sparse_vehicles",
            GateRule::Accepted => "accepted",
            GateRule::Boosted => "boosted",
            GateRule::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub status: AnalysisStatus,
    pub is_accident: bool,
    pub confidence: f64,
    pub rule: GateRule,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionGate {
    config: GateConfig,
}

impl DecisionGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Apply the gate rules in order: no vehicles, sparse vehicles, then the raw flag.
    pub fn apply(&self, aggregation: &AggregationResult, total_vehicles: usize) -> GateDecision {
        let (is_accident, confidence, rule) = if total_vehicles == 0 {
            (false, 0.0, GateRule::NoVehicles)
        } else if total_vehicles < self.config.min_vehicles {
            (
                false,
                aggregation.final_confidence.min(self.config.sparse_confidence_cap),
                GateRule::SparseVehicles,
            )
        } else if !aggregation.is_accident {
            (false, aggregation.final_confidence, GateRule::Rejected)
        } else if total_vehicles > self.config.boost_vehicles {
            let boosted = (aggregation.final_confidence * self.config.boost_factor).min(self.config.boost_cap);
            (true, boosted, GateRule::Boosted)
        } else {
            (true, aggregation.final_confidence, GateRule::Accepted)
        };

        GateDecision {
            status: AnalysisStatus::from_flag(is_accident),
            is_accident,
            confidence,
            rule,
        }
    }
}
