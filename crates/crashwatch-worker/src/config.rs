//! Pipeline configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crashwatch_media::{
    SequenceModelConfig, VehicleDetectorConfig, DEFAULT_CONTEXT_WINDOW, DEFAULT_FONT_PATH,
    DEFAULT_MAX_DURATION_SECS, DEFAULT_MAX_FRAME_WIDTH, DEFAULT_TARGET_FPS,
};
use crashwatch_models::DEFAULT_SEQUENCE_LENGTH;
use validator::Validate;

use crate::aggregator::AggregatorConfig;
use crate::device::DevicePolicy;
use crate::error::{PipelineError, PipelineResult};
use crate::gate::GateConfig;

/// Pipeline configuration.
#[derive(Debug, Clone, Validate)]
pub struct PipelineConfig {
    /// Frame sampling rate
    #[validate(range(min = 0.1, max = 120.0))]
    pub target_fps: f64,
    /// Longest accepted video, in seconds
    #[validate(range(min = 1.0))]
    pub max_video_duration: f64,
    /// Fixed feature sequence length L
    #[validate(range(min = 1))]
    pub sequence_length: usize,
    /// Trailing context window of the sequence model
    #[validate(range(min = 1))]
    pub sequence_context: usize,
    /// Detector confidence threshold
    #[validate(range(min = 0.0, max = 1.0))]
    pub detection_confidence: f32,
    /// Decoded frames wider than this are downscaled
    #[validate(range(min = 32))]
    pub max_frame_width: u32,
    #[validate(nested)]
    pub aggregator: AggregatorConfig,
    #[validate(nested)]
    pub gate: GateConfig,
    pub device: DevicePolicy,
    /// Wall-clock budget for one analysis
    pub analysis_timeout: Duration,
    pub detector_model_path: String,
    pub sequence_model_path: String,
    /// Where uploaded videos are looked up by id
    pub upload_dir: PathBuf,
    /// Root for evidence artifacts and the result cache
    pub storage_dir: PathBuf,
    /// TrueType font for the evidence label banner
    pub annotation_font_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            max_video_duration: DEFAULT_MAX_DURATION_SECS,
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            sequence_context: DEFAULT_CONTEXT_WINDOW,
            detection_confidence: 0.25,
            max_frame_width: DEFAULT_MAX_FRAME_WIDTH,
            aggregator: AggregatorConfig::default(),
            gate: GateConfig::default(),
            device: DevicePolicy::default(),
            analysis_timeout: Duration::from_secs(600), // 10 minutes
            detector_model_path: "models/yolov8n.onnx".to_string(),
            sequence_model_path: "models/accident_lstm.onnx".to_string(),
            upload_dir: PathBuf::from("uploads"),
            storage_dir: PathBuf::from("storage"),
            annotation_font_path: PathBuf::from(DEFAULT_FONT_PATH),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            target_fps: env_or("TARGET_FPS", defaults.target_fps),
            max_video_duration: env_or("MAX_VIDEO_DURATION", defaults.max_video_duration),
            sequence_length: env_or("SEQUENCE_LENGTH", defaults.sequence_length),
            sequence_context: env_or("SEQUENCE_CONTEXT", defaults.sequence_context),
            detection_confidence: env_or("DETECTION_CONFIDENCE", defaults.detection_confidence),
            max_frame_width: env_or("MAX_FRAME_WIDTH", defaults.max_frame_width),
            aggregator: AggregatorConfig {
                window_size: env_or("CONFIDENCE_WINDOW_SIZE", defaults.aggregator.window_size),
                spike_threshold: env_or("SPIKE_THRESHOLD", defaults.aggregator.spike_threshold),
                consistency_threshold: env_or("CONSISTENCY_THRESHOLD", defaults.aggregator.consistency_threshold),
                event_threshold: env_or("EVENT_THRESHOLD", defaults.aggregator.event_threshold),
            },
            gate: GateConfig {
                min_vehicles: env_or("GATE_MIN_VEHICLES", defaults.gate.min_vehicles),
                boost_vehicles: env_or("GATE_BOOST_VEHICLES", defaults.gate.boost_vehicles),
                ..defaults.gate
            },
            device: DevicePolicy {
                accelerator_enabled: env_flag("USE_GPU", defaults.device.accelerator_enabled),
                cpu_fallback_enabled: env_flag("CPU_FALLBACK", defaults.device.cpu_fallback_enabled),
            },
            analysis_timeout: Duration::from_secs(env_or(
                "ANALYSIS_TIMEOUT_SECS",
                defaults.analysis_timeout.as_secs(),
            )),
            detector_model_path: std::env::var("YOLO_MODEL_PATH").unwrap_or(defaults.detector_model_path),
            sequence_model_path: std::env::var("LSTM_MODEL_PATH").unwrap_or(defaults.sequence_model_path),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            storage_dir: std::env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            annotation_font_path: std::env::var("ANNOTATION_FONT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.annotation_font_path),
        }
    }

    /// Validate field ranges and nested sections.
    pub fn validate_config(&self) -> PipelineResult<()> {
        self.validate()
            .map_err(|e| PipelineError::config(format!("Invalid pipeline configuration: {}", e)))?;

        if self.analysis_timeout.is_zero() {
            return Err(PipelineError::config("ANALYSIS_TIMEOUT_SECS must be positive"));
        }
        Ok(())
    }

    pub fn detector_config(&self) -> VehicleDetectorConfig {
        VehicleDetectorConfig {
            model_path: self.detector_model_path.clone(),
            use_accelerator: self.device.accelerator_enabled,
            ..VehicleDetectorConfig::default()
        }
    }

    pub fn sequence_config(&self) -> SequenceModelConfig {
        SequenceModelConfig {
            model_path: self.sequence_model_path.clone(),
            context_window: self.sequence_context,
            use_accelerator: self.device.accelerator_enabled,
            ..SequenceModelConfig::default()
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.storage_dir.join("results")
    }
}
