//! End-to-end pipeline tests with a synthetic decoder and scripted models.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tokio::sync::watch;

use crashwatch_media::{
    DecodedFrame, ExecutionDevice, MediaError, MediaResult, ScriptedDetector, ScriptedSequenceModel, SpatialDetector,
    TemporalSequenceModel, VideoDecoder,
};
use crashwatch_models::{AnalysisStatus, BoundingBox, Detection, EventRange, ResultId, VideoId, VideoInfo};
use crashwatch_storage::{
    EvidenceFrame, EvidenceStore, MemoryEvidenceStore, MemoryResultCache, StorageError, StorageResult,
    StoredArtifact,
};
use crashwatch_worker::{
    AccidentPipeline, AnalysisRequest, AnalysisService, PipelineConfig, PipelineError, VideoResolver,
};

/// Decoder producing uniform gray frames for a fixed stream description.
struct SyntheticDecoder {
    info: VideoInfo,
    delay: Duration,
    timeout_secs: Option<u64>,
}

impl SyntheticDecoder {
    fn new(fps: f64, frame_count: u64) -> Self {
        Self {
            info: VideoInfo::new(fps, frame_count, 64, 48),
            delay: Duration::ZERO,
            timeout_secs: None,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Decoding fails the way a killed FFmpeg process does.
    fn timing_out(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

#[async_trait]
impl VideoDecoder for SyntheticDecoder {
    async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
        Ok(self.info)
    }

    async fn decode(&self, _path: &Path, info: &VideoInfo, interval: u64) -> MediaResult<Vec<DecodedFrame>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(secs) = self.timeout_secs {
            return Err(MediaError::Timeout(secs));
        }

        Ok((0..info.frame_count)
            .filter(|raw_index| raw_index % interval == 0)
            .map(|raw_index| DecodedFrame {
                raw_index,
                image: RgbImage::from_pixel(info.width, info.height, Rgb([40, 40, 40])),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

fn car() -> Detection {
    Detection::new(BoundingBox::new(5.0, 5.0, 30.0, 30.0), 0.9, 2, "car")
}

/// 0.95 on frames 40..=60, 0.1 elsewhere.
fn accident_signal() -> Vec<f32> {
    let mut confidences = vec![0.1; 150];
    confidences[40..=60].fill(0.95);
    confidences
}

struct Harness {
    pipeline: AccidentPipeline,
    store: Arc<MemoryEvidenceStore>,
}

fn harness(
    config: PipelineConfig,
    decoder: SyntheticDecoder,
    detector: Arc<dyn SpatialDetector>,
    model: Arc<dyn TemporalSequenceModel>,
) -> Harness {
    let store = Arc::new(MemoryEvidenceStore::new());
    let pipeline = AccidentPipeline::new(config, Arc::new(decoder), detector, model, store.clone()).unwrap();
    Harness { pipeline, store }
}

fn request(id: &str) -> AnalysisRequest {
    AnalysisRequest::new(VideoId::from(id), "/videos/synthetic.mp4")
}

#[tokio::test]
async fn test_no_detections_is_no_accident() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 300),
        Arc::new(ScriptedDetector::default()),
        Arc::new(ScriptedSequenceModel::constant(0.95, 150)),
    );

    let result = h.pipeline.analyze(&request("empty-road")).await.unwrap();

    assert_eq!(result.details.frame_count, 100);
    assert_eq!(result.details.duration, "10.0 seconds");
    assert_eq!(result.status, AnalysisStatus::NoAccident);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.details.accident_frame_count, 0);
    assert!(result.details.accident_frame_urls.is_empty());
    assert!(result.details.accident_clip_url.is_empty());
    assert_eq!(result.id.as_str(), "result-empty-road");
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_sustained_signal_is_accident() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::uniform(61, vec![car()])),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );

    let result = h.pipeline.analyze(&request("crash")).await.unwrap();
    let details = &result.details;

    assert_eq!(details.frame_count, 61);
    assert_eq!(result.status, AnalysisStatus::Accident);
    assert!((result.confidence - 0.809).abs() <= 0.002, "confidence {}", result.confidence);
    assert!(details
        .event_frames
        .iter()
        .any(|range| range.overlaps(&EventRange::new(40, 60))));
    assert!(details.temporal_stability > 0.6);
    assert!(!details.spike_filtered);

    assert_eq!(details.accident_frame_count, 21);
    assert_eq!(details.accident_frame_urls.len(), 5);
    assert_eq!(details.accident_frame_urls[2], "memory://result-crash/frame_0050.jpg");
    assert_eq!(details.accident_clip_url, "memory://result-crash/accident.mp4");

    assert!(matches!(
        h.store.get(&details.accident_clip_url),
        Some(StoredArtifact::Clip { frame_count: 21, width: 64, height: 48, .. })
    ));
    assert!(matches!(
        h.store.get(&details.accident_frame_urls[2]),
        Some(StoredArtifact::Frame { index: 50, annotated: true, .. })
    ));
}

#[tokio::test]
async fn test_sparse_vehicles_are_gated() {
    let mut per_frame = vec![Vec::new(); 61];
    for frame in per_frame.iter_mut().take(3) {
        frame.push(car());
    }

    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::new(per_frame)),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );

    let result = h.pipeline.analyze(&request("sparse")).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::NoAccident);
    assert!(result.confidence <= 0.3);
    // Aggregator diagnostics are still reported.
    assert!(!result.details.event_frames.is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_confidences_are_trimmed_to_real_frames() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 60),
        Arc::new(ScriptedDetector::uniform(20, vec![car()])),
        Arc::new(ScriptedSequenceModel::constant(0.95, 150)),
    );

    let result = h.pipeline.analyze(&request("short")).await.unwrap();

    assert_eq!(result.details.frame_count, 20);
    assert_eq!(result.details.event_frames, vec![EventRange::new(0, 19)]);
    assert_eq!(result.details.accident_frame_count, 20);
}

#[tokio::test]
async fn test_timeout_discards_partial_results() {
    let detector = Arc::new(ScriptedDetector::uniform(61, vec![car()]));
    let config = PipelineConfig {
        analysis_timeout: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    let h = harness(
        config,
        SyntheticDecoder::new(30.0, 183).slow(Duration::from_millis(20)),
        detector.clone(),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );

    let err = h.pipeline.analyze(&request("slow")).await.unwrap_err();

    assert!(matches!(err, PipelineError::Timeout { checkpoint: "post_extraction", .. }));
    assert_eq!(detector.calls_on(ExecutionDevice::Accelerator), 0);
    assert_eq!(detector.calls_on(ExecutionDevice::Cpu), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_decoder_timeout_is_timeout() {
    let detector = Arc::new(ScriptedDetector::uniform(61, vec![car()]));
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183).timing_out(600),
        detector.clone(),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );

    let err = h.pipeline.analyze(&request("stalled")).await.unwrap_err();

    assert!(matches!(err, PipelineError::Timeout { checkpoint: "extraction", .. }));
    assert_eq!(err.kind(), "timeout");
    assert!(!err.is_client_error());
    assert_eq!(detector.calls_on(ExecutionDevice::Accelerator), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_cancellation_at_checkpoint() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::uniform(61, vec![car()])),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = h.pipeline.analyze_with_cancel(&request("cancelled"), rx).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled("post_extraction")));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_detector_exhaustion_falls_back_to_cpu() {
    let detector = Arc::new(ScriptedDetector::uniform(61, vec![car()]).exhausting_accelerator());
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        detector.clone(),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );

    let result = h.pipeline.analyze(&request("fallback")).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Accident);
    assert_eq!(detector.release_count(), 1);
    assert_eq!(detector.calls_on(ExecutionDevice::Accelerator), 1);
    assert_eq!(detector.calls_on(ExecutionDevice::Cpu), 61);
}

#[tokio::test]
async fn test_sequence_exhaustion_falls_back_to_cpu() {
    let model = Arc::new(ScriptedSequenceModel::new(accident_signal()).exhausting_accelerator());
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::uniform(61, vec![car()])),
        model.clone(),
    );

    let result = h.pipeline.analyze(&request("seq-fallback")).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Accident);
    assert_eq!(model.release_count(), 1);
}

#[tokio::test]
async fn test_second_exhaustion_is_fatal() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::uniform(61, vec![car()])),
        Arc::new(ScriptedSequenceModel::new(accident_signal()).exhausting_everywhere()),
    );

    let err = h.pipeline.analyze(&request("oom")).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::ResourceExhausted { stage: "sequence_inference", .. }
    ));
    assert!(!err.is_client_error());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_detector_failure_is_not_masked() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::default().failing("weights corrupted")),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );

    let err = h.pipeline.analyze(&request("broken")).await.unwrap_err();
    assert_eq!(err.kind(), "internal");
    assert!(err.to_string().contains("weights corrupted"));
}

#[tokio::test]
async fn test_invalid_video_is_client_error() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(0.0, 300),
        Arc::new(ScriptedDetector::default()),
        Arc::new(ScriptedSequenceModel::constant(0.1, 150)),
    );

    let err = h.pipeline.analyze(&request("zero-fps")).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidVideo(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_over_long_video_is_rejected() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 9001),
        Arc::new(ScriptedDetector::default()),
        Arc::new(ScriptedSequenceModel::constant(0.1, 150)),
    );

    let err = h.pipeline.analyze(&request("too-long")).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidVideo(_)));
}

#[tokio::test]
async fn test_service_caches_results() {
    let uploads = tempfile::tempdir().unwrap();
    std::fs::write(uploads.path().join("crash.mp4"), b"synthetic").unwrap();

    let detector = Arc::new(ScriptedDetector::uniform(61, vec![car()]));
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        detector.clone(),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );
    let cache = Arc::new(MemoryResultCache::new());
    let service = AnalysisService::new(Arc::new(h.pipeline), VideoResolver::new(uploads.path()), cache.clone());

    let video_id = VideoId::from("crash");
    let first = service.analyze_video(&video_id).await.unwrap();
    let calls = detector.calls_on(ExecutionDevice::Accelerator);

    let second = service.analyze_video(&video_id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(detector.calls_on(ExecutionDevice::Accelerator), calls);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_service_unknown_video() {
    let uploads = tempfile::tempdir().unwrap();
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::default()),
        Arc::new(ScriptedSequenceModel::constant(0.1, 150)),
    );
    let service = AnalysisService::new(
        Arc::new(h.pipeline),
        VideoResolver::new(uploads.path()),
        Arc::new(MemoryResultCache::new()),
    );

    let err = service.analyze_video(&VideoId::from("missing")).await.unwrap_err();
    assert!(matches!(err, PipelineError::VideoNotFound(_)));
}

/// Stores stills in memory; every clip write fails.
struct ClipFailingStore {
    stills: MemoryEvidenceStore,
}

#[async_trait]
impl EvidenceStore for ClipFailingStore {
    async fn save_frames(&self, result_id: &ResultId, frames: &[EvidenceFrame]) -> StorageResult<Vec<String>> {
        self.stills.save_frames(result_id, frames).await
    }

    async fn write_clip(&self, _result_id: &ResultId, _frames: &[&RgbImage], _fps: f64) -> StorageResult<Option<String>> {
        Err(StorageError::write_failed("libx264 exited with status 1"))
    }

    fn name(&self) -> &'static str {
        "clip-failing"
    }
}

#[tokio::test]
async fn test_clip_failure_keeps_the_result() {
    let store = Arc::new(ClipFailingStore {
        stills: MemoryEvidenceStore::new(),
    });
    let pipeline = AccidentPipeline::new(
        PipelineConfig::default(),
        Arc::new(SyntheticDecoder::new(30.0, 183)),
        Arc::new(ScriptedDetector::uniform(61, vec![car()])),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
        store.clone(),
    )
    .unwrap();

    let result = tokio_test::assert_ok!(pipeline.analyze(&request("no-clip")).await);

    assert_eq!(result.status, AnalysisStatus::Accident);
    assert_eq!(result.details.accident_frame_urls.len(), 5);
    assert_eq!(result.details.accident_frame_count, 21);
    assert!(result.details.accident_clip_url.is_empty());
    assert_eq!(store.stills.len(), 5);
}

#[tokio::test]
async fn test_service_rejects_unsafe_id_for_path() {
    let h = harness(
        PipelineConfig::default(),
        SyntheticDecoder::new(30.0, 183),
        Arc::new(ScriptedDetector::uniform(61, vec![car()])),
        Arc::new(ScriptedSequenceModel::new(accident_signal())),
    );
    let store = h.store.clone();
    let service = AnalysisService::new(
        Arc::new(h.pipeline),
        VideoResolver::new("uploads"),
        Arc::new(MemoryResultCache::new()),
    );

    let err = service
        .analyze_path(VideoId::from("a..b"), "/videos/a..b.mp4".into())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidVideo(_)));
    assert!(err.is_client_error());
    assert!(store.is_empty());
}
