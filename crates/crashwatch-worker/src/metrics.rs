//! Prometheus metrics for the analysis pipeline.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{PipelineError, PipelineResult};

/// Metric names as constants for consistency.
pub mod names {
    // Stage latency
    pub const STAGE_DURATION_SECONDS: &str = "crashwatch_stage_duration_seconds";
    pub const ANALYSIS_DURATION_SECONDS: &str = "crashwatch_analysis_duration_seconds";

    // Outcomes
    pub const ANALYSES_TOTAL: &str = "crashwatch_analyses_total";
    pub const ANALYSES_FAILED_TOTAL: &str = "crashwatch_analyses_failed_total";
    pub const CACHE_HITS_TOTAL: &str = "crashwatch_cache_hits_total";

    // Devices
    pub const DEVICE_FALLBACKS_TOTAL: &str = "crashwatch_device_fallbacks_total";
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn install_exporter(addr: SocketAddr) -> PipelineResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::config(format!("Failed to install metrics exporter: {}", e)))
}

/// Record one stage's latency (`extraction`, `detection`, `sequence`, `aggregation`, `evidence`).
pub fn record_stage(stage: &'static str, duration: Duration) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage).record(duration.as_secs_f64());
}

/// Record a completed analysis.
pub fn record_outcome(status: &'static str, duration: Duration) {
    counter!(names::ANALYSES_TOTAL, "status" => status).increment(1);
    histogram!(names::ANALYSIS_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Record a failed analysis by error kind.
pub fn record_failure(err: &PipelineError) {
    counter!(names::ANALYSES_FAILED_TOTAL, "kind" => err.kind()).increment(1);
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

/// Record a switch from the accelerator to CPU.
pub fn record_device_fallback(stage: &'static str) {
    counter!(names::DEVICE_FALLBACKS_TOTAL, "stage" => stage).increment(1);
}
