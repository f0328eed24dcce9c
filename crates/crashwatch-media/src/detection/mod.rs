//! Inference capabilities used by the pipeline.
//!
//! - [`SpatialDetector`]: per-frame object detection
//! - [`TemporalSequenceModel`]: feature sequence to per-position probability
//!
//! Both have ONNX Runtime implementations and scripted stand-ins.

mod detector;
mod scripted;
mod sequence;
mod session;

pub use detector::{
    decode_yolo_output, non_maximum_suppression, OnnxVehicleDetector, SpatialDetector,
    VehicleDetectorConfig, COCO_CLASSES,
};
pub use scripted::{ScriptedDetector, ScriptedSequenceModel};
pub use sequence::{
    trailing_windows, OnnxSequenceModel, SequenceModelConfig, TemporalSequenceModel,
    DEFAULT_CONTEXT_WINDOW,
};
