//! Entry point: resolve a video, consult the result cache, run the pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use crashwatch_models::{AnalysisResult, ResultId, VideoId};
use crashwatch_storage::ResultCache;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::metrics;
use crate::pipeline::{AccidentPipeline, AnalysisRequest};
use crate::source::{validate_video_id, VideoResolver};

pub struct AnalysisService {
    pipeline: Arc<AccidentPipeline>,
    resolver: VideoResolver,
    cache: Arc<dyn ResultCache>,
    cancel: Option<watch::Receiver<bool>>,
}

impl AnalysisService {
    pub fn new(pipeline: Arc<AccidentPipeline>, resolver: VideoResolver, cache: Arc<dyn ResultCache>) -> Self {
        Self {
            pipeline,
            resolver,
            cache,
            cancel: None,
        }
    }

    /// Abort every invocation at its next checkpoint once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn pipeline(&self) -> &AccidentPipeline {
        &self.pipeline
    }

    /// Analyze an uploaded video by id, returning the cached result when present.
    pub async fn analyze_video(&self, video_id: &VideoId) -> PipelineResult<AnalysisResult> {
        if let Some(cached) = self.cached_result(&ResultId::for_video(video_id)).await {
            return Ok(cached);
        }

        let path = self.resolver.resolve(video_id).await?;
        self.run(AnalysisRequest::new(video_id.clone(), path)).await
    }

    /// Analyze a file directly; the result is cached under `video_id`.
    pub async fn analyze_path(&self, video_id: VideoId, path: PathBuf) -> PipelineResult<AnalysisResult> {
        validate_video_id(&video_id)?;
        self.run(AnalysisRequest::new(video_id, path)).await
    }

    /// Cached result, if any. Cache read failures count as misses.
    pub async fn cached_result(&self, result_id: &ResultId) -> Option<AnalysisResult> {
        match self.cache.get(result_id).await {
            Ok(Some(result)) => {
                info!(result_id = %result_id, "Returning cached analysis result");
                metrics::record_cache_hit();
                Some(result)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(result_id = %result_id, error = %e, "Result cache read failed");
                None
            }
        }
    }

    async fn run(&self, request: AnalysisRequest) -> PipelineResult<AnalysisResult> {
        let result = match self.cancel.clone() {
            Some(cancel) => self.pipeline.analyze_with_cancel(&request, cancel).await?,
            None => self.pipeline.analyze(&request).await?,
        };

        // The result stands even if it could not be cached.
        if let Err(e) = self.cache.put(&result).await {
            warn!(result_id = %result.id, error = %e, "Failed to cache analysis result");
        }

        Ok(result)
    }
}
