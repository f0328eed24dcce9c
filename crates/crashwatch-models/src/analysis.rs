//! Analysis result models returned by the pipeline entry point.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aggregation::EventRange;
use crate::video::VideoId;

/// Identifier of an analysis result, `result-{video_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ResultId(pub String);

impl ResultId {
    pub fn for_video(video_id: &VideoId) -> Self {
        Self(format!("result-{}", video_id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResultId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Final classification of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Accident,
    NoAccident,
}

impl AnalysisStatus {
    pub fn from_flag(is_accident: bool) -> Self {
        if is_accident {
            AnalysisStatus::Accident
        } else {
            AnalysisStatus::NoAccident
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Accident => "accident",
            AnalysisStatus::NoAccident => "no_accident",
        }
    }

    pub fn is_accident(&self) -> bool {
        matches!(self, AnalysisStatus::Accident)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic and evidence fields of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDetails {
    pub spatial_features: String,
    pub temporal_features: String,
    pub frame_count: usize,
    /// Formatted as `"{:.1} seconds"`
    pub duration: String,
    pub temporal_stability: f64,
    pub spike_filtered: bool,
    #[schemars(with = "Vec<(usize, usize)>")]
    pub event_frames: Vec<EventRange>,
    pub max_confidence: f64,
    pub mean_confidence: f64,
    pub accident_frame_count: usize,
    /// Opaque storage locations of the selected evidence frames
    pub accident_frame_urls: Vec<String>,
    /// Opaque storage location of the clip, empty when none was written
    pub accident_clip_url: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResult {
    pub id: ResultId,
    pub video_id: VideoId,
    pub status: AnalysisStatus,
    /// Gated confidence rounded to 3 decimals
    pub confidence: f64,
    /// Wall-clock seconds spent in the pipeline
    pub inference_time: f64,
    pub timestamp: DateTime<Utc>,
    pub details: AnalysisDetails,
}

impl AnalysisResult {
    pub fn is_accident(&self) -> bool {
        self.status.is_accident()
    }
}
