//! Per-frame feature vectors consumed by the temporal sequence model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Number of values in one feature vector.
pub const FEATURE_DIM: usize = 3;

/// Default fixed sequence length L.
pub const DEFAULT_SEQUENCE_LENGTH: usize = 150;

/// Numeric summary of one frame's vehicle detections.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FeatureVector {
    /// Vehicle count / 10, capped at 2.0
    pub vehicle_count: f32,
    /// Mean detector confidence of vehicle detections
    pub mean_confidence: f32,
    /// Bounding-box coordinate variance / 100000, capped at 5.0
    pub bbox_variance: f32,
}

impl FeatureVector {
    pub const ZERO: FeatureVector = FeatureVector {
        vehicle_count: 0.0,
        mean_confidence: 0.0,
        bbox_variance: 0.0,
    };

    pub fn new(vehicle_count: f32, mean_confidence: f32, bbox_variance: f32) -> Self {
        Self {
            vehicle_count,
            mean_confidence,
            bbox_variance,
        }
    }

    pub fn to_array(&self) -> [f32; FEATURE_DIM] {
        [self.vehicle_count, self.mean_confidence, self.bbox_variance]
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Ordered feature vectors whose length is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FeatureSequence {
    vectors: Vec<FeatureVector>,
}

impl FeatureSequence {
    /// Build a sequence of exactly `length` vectors: truncated if longer,
    /// zero-padded at the tail if shorter.
    pub fn with_length(mut vectors: Vec<FeatureVector>, length: usize) -> Self {
        vectors.truncate(length);
        vectors.resize(length, FeatureVector::ZERO);
        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn as_slice(&self) -> &[FeatureVector] {
        &self.vectors
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureVector> {
        self.vectors.iter()
    }

    /// Row-major `[len, FEATURE_DIM]` matrix.
    pub fn to_matrix(&self) -> Vec<[f32; FEATURE_DIM]> {
        self.vectors.iter().map(FeatureVector::to_array).collect()
    }
}
