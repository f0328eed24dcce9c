//! Accident detection worker binary.
//!
//! Usage: `crashwatch-worker <video-id | path>`. Prints the analysis result as
//! JSON on stdout. Exits with 2 for client errors and 1 for anything else.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crashwatch_media::{check_ffmpeg, FfmpegDecoder, OnnxSequenceModel, OnnxVehicleDetector};
use crashwatch_models::VideoId;
use crashwatch_storage::{FsResultCache, LocalEvidenceStore};
use crashwatch_worker::logging::init_tracing;
use crashwatch_worker::metrics::install_exporter;
use crashwatch_worker::{AccidentPipeline, AnalysisService, PipelineConfig, PipelineError, VideoResolver};

const USAGE: &str = "usage: crashwatch-worker <video-id | path>";

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let Some(input) = std::env::args().nth(1) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    if let Err(e) = run(&input).await {
        error!("Analysis failed: {:#}", e);
        let client_error = e
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_client_error);
        std::process::exit(if client_error { 2 } else { 1 });
    }
}

async fn run(input: &str) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    config.validate_config()?;
    info!("Pipeline config: {:?}", config);

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("Invalid METRICS_ADDR")?;
        install_exporter(addr)?;
        info!(%addr, "Metrics exporter listening");
    }

    if let Err(e) = check_ffmpeg() {
        warn!("{}; decoding and clip encoding will fail", e);
    }

    let detector = OnnxVehicleDetector::new(config.detector_config())
        .map_err(|e| PipelineError::from_media("detector loading", e))?;
    let sequence_model = OnnxSequenceModel::new(config.sequence_config())
        .map_err(|e| PipelineError::from_media("sequence model loading", e))?;

    // Ctrl-C kills an in-flight decode and aborts at the next checkpoint.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling analysis");
            cancel_tx.send(true).ok();
        }
    });

    let decoder = FfmpegDecoder::new(config.max_frame_width)
        .with_timeout(config.analysis_timeout.as_secs())
        .with_cancel(cancel_rx.clone());
    let store = LocalEvidenceStore::new(&config.storage_dir);
    let cache = FsResultCache::new(config.results_dir());
    let resolver = VideoResolver::new(&config.upload_dir);

    let pipeline = AccidentPipeline::new(
        config,
        Arc::new(decoder),
        Arc::new(detector),
        Arc::new(sequence_model),
        Arc::new(store),
    )?;

    let service = AnalysisService::new(Arc::new(pipeline), resolver, Arc::new(cache)).with_cancel(cancel_rx);

    let path = Path::new(input);
    let result = if path.is_file() {
        let video_id = VideoId::from(path.file_stem().and_then(|s| s.to_str()).unwrap_or(input));
        service.analyze_path(video_id, path.to_path_buf()).await?
    } else {
        service.analyze_video(&VideoId::from(input)).await?
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
