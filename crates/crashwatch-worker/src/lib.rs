//! Accident detection pipeline.
//!
//! This crate provides:
//! - Feature vectorization of per-frame detections
//! - The temporal confidence aggregator (spike filter, windowed scoring,
//!   consistency, event grouping, fused confidence)
//! - Evidentiary gating against detection volume
//! - Evidence selection and storage orchestration
//! - The `AccidentPipeline` and `AnalysisService` entry points

pub mod aggregator;
pub mod config;
pub mod deadline;
pub mod device;
pub mod error;
pub mod evaluation;
pub mod evidence;
pub mod features;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod source;
pub mod summary;

pub use aggregator::{AggregatorConfig, TemporalConfidenceAggregator};
pub use config::PipelineConfig;
pub use deadline::{Checkpoint, Deadline};
pub use device::{DevicePolicy, DeviceSelector, Stage};
pub use error::{PipelineError, PipelineResult};
pub use evaluation::EvaluationMetrics;
pub use evidence::{EvidenceArtifacts, EvidenceExtractor, EvidencePlan};
pub use features::FeatureVectorizer;
pub use gate::{DecisionGate, GateConfig, GateDecision, GateRule};
pub use logging::AnalysisLogger;
pub use pipeline::{AccidentPipeline, AnalysisRequest};
pub use service::AnalysisService;
pub use source::VideoResolver;
