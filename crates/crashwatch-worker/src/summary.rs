//! Text summaries for analysis details.

use crashwatch_models::AggregationResult;

/// Frame count, vehicle detections and their per-frame average.
pub fn spatial_summary(frame_count: usize, total_vehicles: usize) -> String {
    let per_frame = if frame_count == 0 {
        0.0
    } else {
        total_vehicles as f64 / frame_count as f64
    };

    format!(
        "Analyzed {} frames: {} vehicle detections ({:.1} per frame)",
        frame_count, total_vehicles, per_frame
    )
}

/// Stability, event count and spike filtering.
pub fn temporal_summary(aggregation: &AggregationResult) -> String {
    let events = aggregation.event_frames.len();
    format!(
        "Temporal stability {:.2}; {} event {}; spikes {}",
        aggregation.temporal_stability,
        events,
        if events == 1 { "range" } else { "ranges" },
        if aggregation.spike_filtered { "filtered" } else { "not detected" }
    )
}
