//! Analysis result cache keyed by result id.
//!
//! Passed explicitly to the service boundary; the pipeline itself keeps no
//! state between invocations.

use async_trait::async_trait;
use crashwatch_models::{AnalysisResult, ResultId};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, id: &ResultId) -> StorageResult<Option<AnalysisResult>>;

    async fn put(&self, result: &AnalysisResult) -> StorageResult<()>;
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryResultCache {
    entries: RwLock<HashMap<ResultId, AnalysisResult>>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, id: &ResultId) -> StorageResult<Option<AnalysisResult>> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn put(&self, result: &AnalysisResult) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .insert(result.id.clone(), result.clone());
        Ok(())
    }
}

/// Compress an `AnalysisResult` to gzip JSON bytes.
pub fn compress_result(result: &AnalysisResult) -> StorageResult<Vec<u8>> {
    let json = serde_json::to_vec(result)
        .map_err(|e| StorageError::Serialization(format!("Failed to serialize result: {}", e)))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| StorageError::Serialization(format!("Failed to gzip result: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| StorageError::Serialization(format!("Failed to finish gzip encoding: {}", e)))
}

/// Decompress gzip JSON bytes to an `AnalysisResult`.
///
/// Returns `None` if decompression or deserialization fails (treated as cache miss).
pub fn decompress_result(data: &[u8]) -> Option<AnalysisResult> {
    let mut decoder = GzDecoder::new(data);
    let mut json = String::new();

    if let Err(e) = decoder.read_to_string(&mut json) {
        warn!(error = %e, "Failed to decompress cached result");
        return None;
    }

    match serde_json::from_str::<AnalysisResult>(&json) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(error = %e, "Failed to deserialize cached result");
            None
        }
    }
}

/// Cache stored as `{root}/{result_id}.json.gz`.
#[derive(Debug, Clone)]
pub struct FsResultCache {
    root: PathBuf,
}

impl FsResultCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, id: &ResultId) -> StorageResult<PathBuf> {
        let key = id.as_str();
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(StorageError::invalid_key(key));
        }
        Ok(self.root.join(format!("{}.json.gz", key)))
    }
}

#[async_trait]
impl ResultCache for FsResultCache {
    async fn get(&self, id: &ResultId) -> StorageResult<Option<AnalysisResult>> {
        let path = self.entry_path(id)?;

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(result_id = %id, "Result cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let result = decompress_result(&data);
        if result.is_none() {
            debug!(result_id = %id, "Result cache miss (corrupt entry)");
        }
        Ok(result)
    }

    async fn put(&self, result: &AnalysisResult) -> StorageResult<()> {
        let path = self.entry_path(&result.id)?;
        let bytes = compress_result(result)?;

        tokio::fs::create_dir_all(&self.root).await?;

        // Write then rename so readers never see a partial entry.
        let tmp = path.with_extension("gz.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(result_id = %result.id, bytes = bytes.len(), "Cached result");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crashwatch_models::{AnalysisDetails, AnalysisStatus, EventRange, VideoId};

    fn sample(video: &str) -> AnalysisResult {
        let video_id = VideoId::from(video);
        AnalysisResult {
            id: ResultId::for_video(&video_id),
            video_id,
            status: AnalysisStatus::Accident,
            confidence: 0.809,
            inference_time: 2.5,
            timestamp: Utc::now(),
            details: AnalysisDetails {
                spatial_features: "61 frames".to_string(),
                temporal_features: "stable".to_string(),
                frame_count: 61,
                duration: "6.1 seconds".to_string(),
                temporal_stability: 0.607,
                spike_filtered: false,
                event_frames: vec![EventRange::new(40, 60)],
                max_confidence: 0.95,
                mean_confidence: 0.393,
                accident_frame_count: 21,
                accident_frame_urls: vec!["/frames/result-v/frame_0048.jpg".to_string()],
                accident_clip_url: "/clips/result-v_accident.mp4".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryResultCache::new();
        let result = sample("v1");

        assert!(cache.get(&result.id).await.unwrap().is_none());
        tokio_test::assert_ok!(cache.put(&result).await);
        assert_eq!(cache.get(&result.id).await.unwrap(), Some(result));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_fs_cache_persists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsResultCache::new(dir.path().join("results"));
        let result = sample("v2");

        assert!(cache.get(&result.id).await.unwrap().is_none());
        cache.put(&result).await.unwrap();

        let reopened = FsResultCache::new(dir.path().join("results"));
        let cached = reopened.get(&result.id).await.unwrap().unwrap();
        assert_eq!(cached.details.event_frames, vec![EventRange::new(40, 60)]);
        assert_eq!(cached.status, AnalysisStatus::Accident);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsResultCache::new(dir.path());
        let id = ResultId::from("result-broken");

        std::fs::write(dir.path().join("result-broken.json.gz"), b"not gzip").unwrap();
        assert!(cache.get(&id).await.unwrap().is_none());
    }

    #[test]
    fn test_decompress_garbage() {
        assert!(decompress_result(&[0x1f, 0x8b, 0x00]).is_none());
    }
}
