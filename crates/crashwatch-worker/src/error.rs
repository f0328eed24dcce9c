//! Pipeline error types.

use crashwatch_media::MediaError;
use crashwatch_storage::StorageError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid video: {0}")]
    InvalidVideo(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Resources exhausted during {stage}: {message}")]
    ResourceExhausted { stage: &'static str, message: String },

    #[error("Analysis timed out at {checkpoint} after {elapsed_secs:.1}s (budget {budget_secs:.1}s)")]
    Timeout {
        checkpoint: &'static str,
        elapsed_secs: f64,
        budget_secs: f64,
    },

    #[error("Analysis cancelled at {0}")]
    Cancelled(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn invalid_video(msg: impl Into<String>) -> Self {
        Self::InvalidVideo(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map a media error raised while running `stage`.
    pub fn from_media(stage: &'static str, err: MediaError) -> Self {
        match err {
            MediaError::InvalidVideo(msg) => Self::InvalidVideo(msg),
            MediaError::FileNotFound(path) => Self::VideoNotFound(path.display().to_string()),
            MediaError::ModelNotFound(msg) | MediaError::ModelLoadFailed(msg) => Self::ModelUnavailable(msg),
            MediaError::ResourceExhausted(message) => Self::ResourceExhausted { stage, message },
            // Process-level budget ran out inside the stage.
            MediaError::Timeout(secs) => Self::Timeout {
                checkpoint: stage,
                elapsed_secs: secs as f64,
                budget_secs: secs as f64,
            },
            MediaError::Cancelled => Self::Cancelled(stage),
            other => Self::Internal(format!("{} failed: {}", stage, other)),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidVideo(_) => "invalid_video",
            Self::VideoNotFound(_) => "video_not_found",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the caller can correct the failure (bad or missing input).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidVideo(_) | Self::VideoNotFound(_))
    }
}

impl From<MediaError> for PipelineError {
    fn from(err: MediaError) -> Self {
        Self::from_media("media", err)
    }
}
