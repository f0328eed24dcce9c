//! Accident detection pipeline.
//!
//! One invocation runs its stages strictly in order:
//! extraction → detection → vectorization → sequence inference →
//! aggregation → gating → evidence extraction.
//!
//! Deadline and cancellation are checked after extraction, detection and
//! sequence inference. Evidence is written only after the last checkpoint,
//! so an aborted invocation leaves nothing behind.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use crashwatch_media::{
    Annotator, ExtractedVideo, Frame, FrameExtractor, SpatialDetector, TemporalSequenceModel, VideoDecoder,
};
use crashwatch_models::{
    count_vehicles, format_duration_label, round_to, AnalysisDetails, AnalysisResult, Detection,
    FeatureSequence, ResultId, VideoId,
};
use crashwatch_storage::EvidenceStore;
use tokio::sync::watch;
use tracing::{debug, warn, Instrument};

use crate::aggregator::TemporalConfidenceAggregator;
use crate::config::PipelineConfig;
use crate::deadline::{Checkpoint, Deadline};
use crate::device::{DeviceSelector, Stage};
use crate::error::{PipelineError, PipelineResult};
use crate::evidence::{plan_evidence, EvidenceArtifacts, EvidenceExtractor};
use crate::features::FeatureVectorizer;
use crate::gate::DecisionGate;
use crate::logging::AnalysisLogger;
use crate::metrics;
use crate::summary::{spatial_summary, temporal_summary};

/// Decimal places for reported confidences and timings.
const REPORT_DECIMALS: u32 = 3;

/// A video to analyze.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub video_id: VideoId,
    pub video_path: PathBuf,
}

impl AnalysisRequest {
    pub fn new(video_id: VideoId, video_path: impl Into<PathBuf>) -> Self {
        Self {
            video_id,
            video_path: video_path.into(),
        }
    }
}

/// Stateless between invocations; models are shared read-only.
pub struct AccidentPipeline {
    config: PipelineConfig,
    extractor: FrameExtractor,
    detector: Arc<dyn SpatialDetector>,
    sequence_model: Arc<dyn TemporalSequenceModel>,
    vectorizer: FeatureVectorizer,
    aggregator: TemporalConfidenceAggregator,
    gate: DecisionGate,
    evidence: EvidenceExtractor,
}

impl AccidentPipeline {
    pub fn new(
        config: PipelineConfig,
        decoder: Arc<dyn VideoDecoder>,
        detector: Arc<dyn SpatialDetector>,
        sequence_model: Arc<dyn TemporalSequenceModel>,
        store: Arc<dyn EvidenceStore>,
    ) -> PipelineResult<Self> {
        config.validate_config()?;

        let annotator = Annotator::from_font_file(&config.annotation_font_path).unwrap_or_else(|e| {
            warn!(
                path = %config.annotation_font_path.display(),
                error = %e,
                "Annotation font unavailable, evidence frames get boxes without a label"
            );
            Annotator::new()
        });

        Ok(Self {
            extractor: FrameExtractor::new(decoder, config.target_fps, config.max_video_duration),
            detector,
            sequence_model,
            vectorizer: FeatureVectorizer::new(config.sequence_length),
            aggregator: TemporalConfidenceAggregator::new(config.aggregator.clone()),
            gate: DecisionGate::new(config.gate.clone()),
            evidence: EvidenceExtractor::new(store, config.target_fps).with_annotator(annotator),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> PipelineResult<AnalysisResult> {
        self.run(request, None).await
    }

    /// Like [`analyze`](Self::analyze), aborting at the next checkpoint once `cancel` reads `true`.
    pub async fn analyze_with_cancel(
        &self,
        request: &AnalysisRequest,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<AnalysisResult> {
        self.run(request, Some(cancel)).await
    }

    async fn run(
        &self,
        request: &AnalysisRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> PipelineResult<AnalysisResult> {
        let logger = AnalysisLogger::new(&request.video_id, "accident_detection");
        let span = logger.create_span();
        let started = Instant::now();

        let outcome = self
            .run_stages(request, cancel, &logger, started)
            .instrument(span)
            .await;

        match &outcome {
            Ok(result) => {
                metrics::record_outcome(result.status.as_str(), started.elapsed());
                logger.log_completion(&format!(
                    "{} (confidence {:.3}, {:.3}s)",
                    result.status, result.confidence, result.inference_time
                ));
            }
            Err(e) => {
                metrics::record_failure(e);
                logger.log_error(&format!("{} [{}]", e, e.kind()));
            }
        }

        outcome
    }

    async fn run_stages(
        &self,
        request: &AnalysisRequest,
        cancel: Option<watch::Receiver<bool>>,
        logger: &AnalysisLogger,
        started: Instant,
    ) -> PipelineResult<AnalysisResult> {
        let mut deadline = Deadline::start(self.config.analysis_timeout);
        if let Some(cancel) = cancel {
            deadline = deadline.with_cancel(cancel);
        }
        logger.log_start(&request.video_path.display().to_string());

        // Extraction
        let stage_started = Instant::now();
        let ExtractedVideo { info, frames, .. } = self
            .extractor
            .extract(&request.video_path)
            .await
            .map_err(|e| PipelineError::from_media("extraction", e))?;
        metrics::record_stage("extraction", stage_started.elapsed());
        deadline.check(Checkpoint::Extraction)?;
        logger.log_progress(&format!("Extracted {} frames", frames.len()));

        let frames = Arc::new(frames);
        let selector = DeviceSelector::new(self.config.device);

        // Detection
        let stage_started = Instant::now();
        let (detections, selector) = self.detect_frames(Arc::clone(&frames), selector).await?;
        metrics::record_stage("detection", stage_started.elapsed());
        deadline.check(Checkpoint::Detection)?;

        let total_vehicles = count_vehicles(&detections);
        logger.log_progress(&format!(
            "Detected {} vehicles on {}",
            total_vehicles,
            selector.current()
        ));

        // Vectorization and sequence inference
        let features = self.vectorizer.vectorize(&detections);
        let stage_started = Instant::now();
        let raw_confidences = self.predict(features, selector).await?;
        metrics::record_stage("sequence", stage_started.elapsed());
        deadline.check(Checkpoint::SequenceInference)?;

        // Positions past the last real frame are padding.
        let confidences: Vec<f64> = raw_confidences
            .iter()
            .take(frames.len().min(self.config.sequence_length))
            .map(|&c| f64::from(c))
            .collect();

        // Aggregation and gating
        let stage_started = Instant::now();
        let aggregation = self.aggregator.aggregate(&confidences);
        let decision = self.gate.apply(&aggregation, total_vehicles);
        metrics::record_stage("aggregation", stage_started.elapsed());

        debug!(
            final_confidence = aggregation.final_confidence,
            temporal_stability = aggregation.temporal_stability,
            raw_accident = aggregation.is_accident,
            events = aggregation.event_frames.len(),
            total_vehicles,
            rule = decision.rule.as_str(),
            "Decision gated"
        );

        // Evidence
        let result_id = ResultId::for_video(&request.video_id);
        let artifacts = if decision.is_accident {
            let stage_started = Instant::now();
            let plan = plan_evidence(&aggregation.event_frames, &confidences, frames.len());
            let artifacts = self
                .evidence
                .extract(&result_id, &frames, &detections, &plan)
                .await?;
            metrics::record_stage("evidence", stage_started.elapsed());
            artifacts
        } else {
            EvidenceArtifacts::default()
        };

        Ok(AnalysisResult {
            id: result_id,
            video_id: request.video_id.clone(),
            status: decision.status,
            confidence: round_to(decision.confidence, REPORT_DECIMALS),
            inference_time: round_to(started.elapsed().as_secs_f64(), REPORT_DECIMALS),
            timestamp: Utc::now(),
            details: AnalysisDetails {
                spatial_features: spatial_summary(frames.len(), total_vehicles),
                temporal_features: temporal_summary(&aggregation),
                frame_count: frames.len(),
                duration: format_duration_label(info.duration),
                temporal_stability: round_to(aggregation.temporal_stability, REPORT_DECIMALS),
                spike_filtered: aggregation.spike_filtered,
                event_frames: aggregation.event_frames,
                max_confidence: round_to(aggregation.max_confidence, REPORT_DECIMALS),
                mean_confidence: round_to(aggregation.mean_confidence, REPORT_DECIMALS),
                accident_frame_count: artifacts.accident_frame_count,
                accident_frame_urls: artifacts.frame_urls,
                accident_clip_url: artifacts.clip_url.unwrap_or_default(),
            },
        })
    }

    /// Detect on every frame off the async runtime.
    async fn detect_frames(
        &self,
        frames: Arc<Vec<Frame>>,
        mut selector: DeviceSelector,
    ) -> PipelineResult<(Vec<Vec<Detection>>, DeviceSelector)> {
        let detector = Arc::clone(&self.detector);
        let threshold = self.config.detection_confidence;

        tokio::task::spawn_blocking(move || {
            let mut detections = Vec::with_capacity(frames.len());
            for frame in frames.iter() {
                let found = selector.run(
                    Stage::Detection,
                    || detector.release_device_memory(),
                    |device| detector.detect(frame, threshold, device),
                )?;
                detections.push(found);
            }
            Ok((detections, selector))
        })
        .await
        .map_err(|e| PipelineError::internal(format!("Detection task join error: {}", e)))?
    }

    /// Run the sequence model off the async runtime.
    async fn predict(&self, features: FeatureSequence, mut selector: DeviceSelector) -> PipelineResult<Vec<f32>> {
        let model = Arc::clone(&self.sequence_model);

        tokio::task::spawn_blocking(move || {
            selector.run(
                Stage::SequenceInference,
                || model.release_device_memory(),
                |device| model.predict_sequence(&features, device),
            )
        })
        .await
        .map_err(|e| PipelineError::internal(format!("Sequence inference task join error: {}", e)))?
    }
}
