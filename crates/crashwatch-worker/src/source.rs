//! Resolves video ids to uploaded files.

use std::path::{Path, PathBuf};

use crashwatch_models::VideoId;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Container extensions tried, in order.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Ids end up in file names; reject anything that could escape a directory.
pub fn validate_video_id(video_id: &VideoId) -> PipelineResult<()> {
    let id = video_id.as_str();
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(PipelineError::invalid_video(format!("Invalid video id: {:?}", id)));
    }
    Ok(())
}

/// Maps `id` to `{upload_dir}/{id}.{ext}`.
#[derive(Debug, Clone)]
pub struct VideoResolver {
    upload_dir: PathBuf,
}

impl VideoResolver {
    pub fn new(upload_dir: impl AsRef<Path>) -> Self {
        Self {
            upload_dir: upload_dir.as_ref().to_path_buf(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// First existing file for `video_id`.
    pub async fn resolve(&self, video_id: &VideoId) -> PipelineResult<PathBuf> {
        validate_video_id(video_id)?;
        let id = video_id.as_str();

        for ext in VIDEO_EXTENSIONS {
            let candidate = self.upload_dir.join(format!("{}.{}", id, ext));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                debug!(video_id = %video_id, path = %candidate.display(), "Resolved video");
                return Ok(candidate);
            }
        }

        Err(PipelineError::VideoNotFound(id.to_string()))
    }
}
