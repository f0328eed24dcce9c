#![deny(unreachable_patterns)]
//! Media layer for the accident detection pipeline.
//!
//! This crate provides:
//! - FFmpeg/FFprobe process handling with cancellation and timeouts
//! - Frame decoding, validation and sampling (`FrameExtractor`)
//! - Spatial detector and temporal sequence model capabilities, backed by ONNX Runtime
//! - Evidence rendering: box annotation, JPEG and H.264 clip encoding

pub mod annotate;
pub mod clip;
pub mod command;
pub mod detection;
pub mod device;
pub mod error;
pub mod frames;
pub mod probe;

pub use annotate::{Annotator, ANNOTATION_LABEL, DEFAULT_FONT_PATH};
pub use clip::{encode_clip, encode_jpeg, DEFAULT_JPEG_QUALITY};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, RawFrames};
pub use detection::{
    OnnxSequenceModel, OnnxVehicleDetector, ScriptedDetector, ScriptedSequenceModel,
    SequenceModelConfig, SpatialDetector, TemporalSequenceModel, VehicleDetectorConfig,
    DEFAULT_CONTEXT_WINDOW,
};
pub use device::ExecutionDevice;
pub use error::{MediaError, MediaResult};
pub use frames::{
    sampling_interval, DecodedFrame, ExtractedVideo, FfmpegDecoder, Frame, FrameExtractor, VideoDecoder,
    DEFAULT_MAX_DURATION_SECS, DEFAULT_MAX_FRAME_WIDTH, DEFAULT_TARGET_FPS,
};
pub use probe::get_video_info;
