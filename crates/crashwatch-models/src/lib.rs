//! Shared data models for the accident detection pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Per-frame object detections and vehicle classes
//! - Feature vectors and fixed-length feature sequences
//! - Temporal aggregation output and event ranges
//! - Analysis results returned to callers

pub mod aggregation;
pub mod analysis;
pub mod detection;
pub mod features;
pub mod utils;
pub mod video;

// Re-export common types
pub use aggregation::{AggregationResult, EventRange};
pub use analysis::{AnalysisDetails, AnalysisResult, AnalysisStatus, ResultId};
pub use detection::{count_vehicles, is_vehicle_class, BoundingBox, Detection, VEHICLE_CLASSES};
pub use features::{FeatureSequence, FeatureVector, DEFAULT_SEQUENCE_LENGTH, FEATURE_DIM};
pub use utils::{format_duration_label, round_to};
pub use video::{VideoId, VideoInfo};
