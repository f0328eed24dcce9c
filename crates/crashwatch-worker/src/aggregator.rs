//! Temporal confidence aggregation.
//!
//! Turns the sequence model's per-frame probabilities into one decision:
//!
//! 1. Spike filter: isolated single-frame peaks are replaced by the mean of
//!    their neighbors. All tests read the unfiltered input.
//! 2. Sliding windows of `window_size` frames, weighted 0.5 → 1.0 toward the
//!    window end.
//! 3. Consistency: share of frames above 0.5 plus the longest such run.
//! 4. Events: maximal runs of frames at or above `event_threshold`.
//! 5. Fused confidence: `0.5·max(window) + 0.3·consistency + 0.2·mean`.
//! 6. Raw flag: confidence > 0.5 and consistency above `consistency_threshold`.
//!
//! Everything here is a pure function of its input.

use crashwatch_models::{AggregationResult, EventRange};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A frame above this is a spike candidate.
const SPIKE_PEAK: f64 = 0.7;
/// Both neighbors of a spike must be below this.
const SPIKE_NEIGHBOR_CEILING: f64 = 0.4;
/// Frames above this count as high-confidence for consistency.
const HIGH_CONFIDENCE: f64 = 0.5;
/// Run length at which the run term of consistency saturates.
const SUSTAINED_RUN_FRAMES: f64 = 10.0;

const RATIO_WEIGHT: f64 = 0.6;
const RUN_WEIGHT: f64 = 0.4;

const WINDOW_WEIGHT: f64 = 0.5;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const MEAN_WEIGHT: f64 = 0.2;

/// Minimum fused confidence for a raw accident flag.
const ACCIDENT_CONFIDENCE: f64 = 0.5;

const MIN_WINDOW_WEIGHT: f64 = 0.5;
const MAX_WINDOW_WEIGHT: f64 = 1.0;

/// Aggregator tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AggregatorConfig {
    /// Sliding window length in frames
    #[validate(range(min = 1))]
    pub window_size: usize,
    /// Minimum jump from the previous frame for a spike
    #[validate(range(min = 0.0, max = 1.0))]
    pub spike_threshold: f64,
    /// Consistency needed for a raw accident flag
    #[validate(range(min = 0.0, max = 1.0))]
    pub consistency_threshold: f64,
    /// Frames at or above this form events; the comparison is inclusive
    #[validate(range(min = 0.0, max = 1.0))]
    pub event_threshold: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_size: 15,
            spike_threshold: 0.3,
            consistency_threshold: 0.6,
            event_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemporalConfidenceAggregator {
    config: AggregatorConfig,
}

impl TemporalConfidenceAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Aggregate a confidence sequence. An empty sequence yields the default result.
    pub fn aggregate(&self, confidences: &[f64]) -> AggregationResult {
        if confidences.is_empty() {
            return AggregationResult::default();
        }

        let (filtered, spike_filtered) = self.filter_spikes(confidences);
        let window_scores = self.window_scores(&filtered);
        let consistency = consistency_score(&filtered);
        let event_frames = self.detect_events(&filtered);
        let filtered_mean = mean(&filtered);

        let final_confidence = match max_value(&window_scores) {
            Some(best_window) => {
                WINDOW_WEIGHT * best_window + CONSISTENCY_WEIGHT * consistency + MEAN_WEIGHT * filtered_mean
            }
            None => filtered_mean,
        }
        .clamp(0.0, 1.0);

        let is_accident =
            final_confidence > ACCIDENT_CONFIDENCE && consistency > self.config.consistency_threshold;

        AggregationResult {
            final_confidence,
            is_accident,
            temporal_stability: consistency.clamp(0.0, 1.0),
            spike_filtered,
            event_frames,
            max_confidence: max_value(confidences).unwrap_or(0.0),
            mean_confidence: mean(confidences),
            confidence_variance: variance(confidences),
        }
    }

    /// Replace isolated spikes with the mean of their original neighbors.
    pub fn filter_spikes(&self, confidences: &[f64]) -> (Vec<f64>, bool) {
        let mut filtered = confidences.to_vec();
        let mut spike_filtered = false;

        if confidences.len() < 3 {
            return (filtered, spike_filtered);
        }

        for i in 1..confidences.len() - 1 {
            let (prev, current, next) = (confidences[i - 1], confidences[i], confidences[i + 1]);
            let is_spike = current > SPIKE_PEAK
                && prev < SPIKE_NEIGHBOR_CEILING
                && next < SPIKE_NEIGHBOR_CEILING
                && (current - prev).abs() > self.config.spike_threshold;

            if is_spike {
                filtered[i] = (prev + next) / 2.0;
                spike_filtered = true;
            }
        }

        (filtered, spike_filtered)
    }

    /// Weighted window averages; a single plain mean when shorter than one window.
    pub fn window_scores(&self, confidences: &[f64]) -> Vec<f64> {
        if confidences.is_empty() {
            return Vec::new();
        }

        let size = self.config.window_size.max(1);
        if confidences.len() < size {
            return vec![mean(confidences)];
        }

        let weights = linspace(MIN_WINDOW_WEIGHT, MAX_WINDOW_WEIGHT, size);
        let total_weight: f64 = weights.iter().sum();

        confidences
            .windows(size)
            .map(|window| {
                window
                    .iter()
                    .zip(&weights)
                    .map(|(value, weight)| value * weight)
                    .sum::<f64>()
                    / total_weight
            })
            .collect()
    }

    /// Maximal runs of frames at or above the event threshold.
    pub fn detect_events(&self, confidences: &[f64]) -> Vec<EventRange> {
        let indices: Vec<usize> = confidences
            .iter()
            .enumerate()
            .filter(|(_, c)| **c >= self.config.event_threshold)
            .map(|(i, _)| i)
            .collect();

        group_consecutive(&indices)
    }
}

/// `0.6·R + 0.4·min(M/10, 1)` where R is the share of frames above 0.5 and
/// M the longest run of such frames.
pub fn consistency_score(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 0.0;
    }

    let mut high = 0usize;
    let mut run = 0usize;
    let mut longest = 0usize;
    for &value in confidences {
        if value > HIGH_CONFIDENCE {
            high += 1;
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }

    let ratio = high as f64 / confidences.len() as f64;
    let sustained = (longest as f64 / SUSTAINED_RUN_FRAMES).min(1.0);
    RATIO_WEIGHT * ratio + RUN_WEIGHT * sustained
}

/// Group ascending indices into maximal runs; a gap larger than one starts a new run.
pub fn group_consecutive(indices: &[usize]) -> Vec<EventRange> {
    let mut ranges: Vec<EventRange> = Vec::new();

    for &index in indices {
        match ranges.last_mut() {
            Some(last) if index == last.end + 1 => last.end = index,
            _ => ranges.push(EventRange::new(index, index)),
        }
    }

    ranges
}

fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

fn max_value(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}
