//! Temporal aggregation output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Inclusive range of frame indices, serialized as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct EventRange {
    pub start: usize,
    pub end: usize,
}

impl EventRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "event range start must not exceed end");
        Self { start, end }
    }

    /// Number of frames covered.
    pub fn frame_count(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn overlaps(&self, other: &EventRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn indices(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }
}

impl From<(usize, usize)> for EventRange {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

impl From<EventRange> for (usize, usize) {
    fn from(range: EventRange) -> Self {
        (range.start, range.end)
    }
}

impl fmt::Display for EventRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.start, self.end)
    }
}

/// Output of the temporal confidence aggregator.
///
/// `max_confidence`, `mean_confidence` and `confidence_variance` describe the
/// unfiltered input and are diagnostics only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AggregationResult {
    pub final_confidence: f64,
    pub is_accident: bool,
    pub temporal_stability: f64,
    pub spike_filtered: bool,
    #[schemars(with = "Vec<(usize, usize)>")]
    pub event_frames: Vec<EventRange>,
    pub max_confidence: f64,
    pub mean_confidence: f64,
    pub confidence_variance: f64,
}

impl AggregationResult {
    pub fn has_events(&self) -> bool {
        !self.event_frames.is_empty()
    }

    /// Total frames covered by all event ranges.
    pub fn event_frame_count(&self) -> usize {
        self.event_frames.iter().map(EventRange::frame_count).sum()
    }
}
