//! Evidence artifact storage.

use async_trait::async_trait;
use crashwatch_media::{encode_clip, encode_jpeg, MediaError, DEFAULT_JPEG_QUALITY};
use crashwatch_models::ResultId;
use image::RgbImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// A frame selected as accident evidence.
#[derive(Debug, Clone)]
pub struct EvidenceFrame {
    /// Sampled frame index
    pub index: usize,
    pub image: RgbImage,
    /// Whether detection boxes were drawn on it
    pub annotated: bool,
}

/// Persists evidence artifacts and returns opaque locations for them.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Store frames as stills; one location per frame, in input order.
    async fn save_frames(&self, result_id: &ResultId, frames: &[EvidenceFrame]) -> StorageResult<Vec<String>>;

    /// Store frames as a clip. `None` when this store cannot produce clips.
    async fn write_clip(&self, result_id: &ResultId, frames: &[&RgbImage], fps: f64) -> StorageResult<Option<String>>;

    fn name(&self) -> &'static str;
}

fn frame_file_name(index: usize) -> String {
    format!("frame_{:04}.jpg", index)
}

/// Result ids become path components; reject anything that could escape the root.
fn validate_result_id(result_id: &ResultId) -> StorageResult<()> {
    let id = result_id.as_str();
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(StorageError::invalid_key(id));
    }
    Ok(())
}

/// Filesystem store laid out as `frames/{id}/frame_XXXX.jpg` and `clips/{id}_accident.mp4`.
pub struct LocalEvidenceStore {
    root: PathBuf,
    jpeg_quality: u8,
    clips_enabled: bool,
}

impl LocalEvidenceStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            clips_enabled: true,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn without_clips(mut self) -> Self {
        self.clips_enabled = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self, result_id: &ResultId) -> PathBuf {
        self.root.join("frames").join(result_id.as_str())
    }

    pub fn clip_path(&self, result_id: &ResultId) -> PathBuf {
        self.root.join("clips").join(format!("{}_accident.mp4", result_id))
    }
}

#[async_trait]
impl EvidenceStore for LocalEvidenceStore {
    async fn save_frames(&self, result_id: &ResultId, frames: &[EvidenceFrame]) -> StorageResult<Vec<String>> {
        validate_result_id(result_id)?;

        let dir = self.frames_dir(result_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut locations = Vec::with_capacity(frames.len());
        for frame in frames {
            let file_name = frame_file_name(frame.index);
            let bytes = encode_jpeg(&frame.image, self.jpeg_quality)?;
            tokio::fs::write(dir.join(&file_name), bytes).await.map_err(|e| {
                StorageError::write_failed(format!("Failed to write {}: {}", file_name, e))
            })?;

            debug!(result_id = %result_id, frame = frame.index, annotated = frame.annotated, "Saved evidence frame");
            locations.push(format!("/frames/{}/{}", result_id, file_name));
        }

        info!(result_id = %result_id, count = locations.len(), "Saved evidence frames");
        Ok(locations)
    }

    async fn write_clip(&self, result_id: &ResultId, frames: &[&RgbImage], fps: f64) -> StorageResult<Option<String>> {
        validate_result_id(result_id)?;

        if !self.clips_enabled || frames.is_empty() {
            return Ok(None);
        }

        let path = self.clip_path(result_id);
        match encode_clip(frames, fps, &path).await {
            Ok(()) => Ok(Some(format!("/clips/{}_accident.mp4", result_id))),
            Err(MediaError::FfmpegNotFound) => {
                warn!(result_id = %result_id, "FFmpeg not available, skipping evidence clip");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Artifact kept by [`MemoryEvidenceStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoredArtifact {
    Frame { index: usize, annotated: bool, jpeg: Vec<u8> },
    Clip { frame_count: usize, fps: f64, width: u32, height: u32 },
}

/// In-process store addressed by `memory://` locations.
#[derive(Debug)]
pub struct MemoryEvidenceStore {
    artifacts: Mutex<BTreeMap<String, StoredArtifact>>,
    clips_enabled: bool,
}

impl Default for MemoryEvidenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self {
            artifacts: Mutex::new(BTreeMap::new()),
            clips_enabled: true,
        }
    }

    pub fn without_clips(mut self) -> Self {
        self.clips_enabled = false;
        self
    }

    pub fn get(&self, location: &str) -> Option<StoredArtifact> {
        self.artifacts.lock().ok()?.get(location).cloned()
    }

    pub fn locations(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .map(|artifacts| artifacts.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, location: String, artifact: StoredArtifact) -> StorageResult<()> {
        self.artifacts
            .lock()
            .map_err(|_| StorageError::write_failed("evidence store lock poisoned"))?
            .insert(location, artifact);
        Ok(())
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn save_frames(&self, result_id: &ResultId, frames: &[EvidenceFrame]) -> StorageResult<Vec<String>> {
        validate_result_id(result_id)?;

        let mut locations = Vec::with_capacity(frames.len());
        for frame in frames {
            let location = format!("memory://{}/{}", result_id, frame_file_name(frame.index));
            let jpeg = encode_jpeg(&frame.image, DEFAULT_JPEG_QUALITY)?;
            self.insert(
                location.clone(),
                StoredArtifact::Frame {
                    index: frame.index,
                    annotated: frame.annotated,
                    jpeg,
                },
            )?;
            locations.push(location);
        }
        Ok(locations)
    }

    async fn write_clip(&self, result_id: &ResultId, frames: &[&RgbImage], fps: f64) -> StorageResult<Option<String>> {
        validate_result_id(result_id)?;

        let Some(first) = frames.first() else {
            return Ok(None);
        };
        if !self.clips_enabled {
            return Ok(None);
        }

        let location = format!("memory://{}/accident.mp4", result_id);
        self.insert(
            location.clone(),
            StoredArtifact::Clip {
                frame_count: frames.len(),
                fps,
                width: first.width(),
                height: first.height(),
            },
        )?;
        Ok(Some(location))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(index: usize) -> EvidenceFrame {
        EvidenceFrame {
            index,
            image: RgbImage::new(16, 16),
            annotated: index == 2,
        }
    }

    #[tokio::test]
    async fn test_memory_store_frames_and_clip() {
        let store = MemoryEvidenceStore::new();
        let id = ResultId::from("result-v1");

        let locations = store
            .save_frames(&id, &[evidence(1), evidence(2)])
            .await
            .unwrap();
        assert_eq!(
            locations,
            vec!["memory://result-v1/frame_0001.jpg", "memory://result-v1/frame_0002.jpg"]
        );
        assert!(matches!(
            store.get(&locations[1]),
            Some(StoredArtifact::Frame { index: 2, annotated: true, .. })
        ));

        let image = RgbImage::new(16, 16);
        let clip = store.write_clip(&id, &[&image, &image, &image], 10.0).await.unwrap();
        assert_eq!(clip.as_deref(), Some("memory://result-v1/accident.mp4"));
        assert!(matches!(
            store.get("memory://result-v1/accident.mp4"),
            Some(StoredArtifact::Clip { frame_count: 3, .. })
        ));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_store_without_clips() {
        let store = MemoryEvidenceStore::new().without_clips();
        let image = RgbImage::new(4, 4);
        let clip = store
            .write_clip(&ResultId::from("result-v1"), &[&image], 10.0)
            .await
            .unwrap();
        assert!(clip.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_local_store_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalEvidenceStore::new(dir.path()).without_clips();
        let id = ResultId::from("result-abc");

        let locations = store.save_frames(&id, &[evidence(42)]).await.unwrap();
        assert_eq!(locations, vec!["/frames/result-abc/frame_0042.jpg"]);

        let written = dir.path().join("frames/result-abc/frame_0042.jpg");
        let bytes = std::fs::read(written).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let image = RgbImage::new(4, 4);
        assert!(store.write_clip(&id, &[&image], 10.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let store = MemoryEvidenceStore::new();
        for bad in ["", "../etc", "a/b", "a\\b"] {
            let err = store
                .save_frames(&ResultId::from(bad), &[evidence(0)])
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)));
        }
    }
}
