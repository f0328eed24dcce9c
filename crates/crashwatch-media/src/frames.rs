//! Frame decoding, validation and sampling.

use async_trait::async_trait;
use crashwatch_models::VideoInfo;
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner, PIPE};
use crate::error::{MediaError, MediaResult};
use crate::probe;

/// Default frame sampling rate.
pub const DEFAULT_TARGET_FPS: f64 = 10.0;
/// Default maximum accepted video duration in seconds.
pub const DEFAULT_MAX_DURATION_SECS: f64 = 300.0;
/// Default bound on decoded frame width; wider sources are downscaled.
pub const DEFAULT_MAX_FRAME_WIDTH: u32 = 1280;

/// One sampled frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in sampled order
    pub index: usize,
    /// Frame number in the source stream
    pub source_index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: usize, source_index: u64, image: RgbImage) -> Self {
        Self {
            index,
            source_index,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

/// A frame as produced by a decoder, tagged with its source frame number.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub raw_index: u64,
    pub image: RgbImage,
}

/// Video decoding capability.
///
/// `decode` may return every frame or only those whose raw index is a
/// multiple of `interval`; the extractor applies the sampling rule either way.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    /// Read stream properties without decoding frames.
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// Decode frames in source order.
    async fn decode(&self, path: &Path, info: &VideoInfo, interval: u64) -> MediaResult<Vec<DecodedFrame>>;

    fn name(&self) -> &'static str;
}

/// Sampling interval: `max(1, floor(source_fps / target_fps))`.
pub fn sampling_interval(source_fps: f64, target_fps: f64) -> u64 {
    if target_fps <= 0.0 || !source_fps.is_finite() {
        return 1;
    }
    ((source_fps / target_fps).floor() as u64).max(1)
}

/// Output geometry bounded by `max_width`, keeping aspect ratio and even dimensions.
pub fn output_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if max_width == 0 || width <= max_width {
        return (width, height);
    }
    let scaled = (height as u64 * max_width as u64 / width as u64) as u32;
    let even_width = (max_width / 2 * 2).max(2);
    let even_height = (scaled / 2 * 2).max(2);
    (even_width, even_height)
}

/// Decoder backed by the FFmpeg CLI, piping rgb24 frames over stdout.
pub struct FfmpegDecoder {
    max_width: u32,
    timeout_secs: Option<u64>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_WIDTH)
    }
}

impl FfmpegDecoder {
    pub fn new(max_width: u32) -> Self {
        Self {
            max_width,
            timeout_secs: None,
            cancel_rx: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Kill an in-flight decode once `cancel_rx` reads `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe::get_video_info(path).await
    }

    async fn decode(&self, path: &Path, info: &VideoInfo, interval: u64) -> MediaResult<Vec<DecodedFrame>> {
        if info.width == 0 || info.height == 0 {
            return Err(MediaError::invalid_video("Video stream has no frame geometry"));
        }

        let interval = interval.max(1);
        let (width, height) = output_dimensions(info.width, info.height, self.max_width);

        let mut filter = format!("select=not(mod(n\\,{}))", interval);
        if (width, height) != (info.width, info.height) {
            filter.push_str(&format!(",scale={}:{}", width, height));
        }

        let cmd = FfmpegCommand::new(path, PIPE)
            .video_filter(filter)
            .output_args(["-fps_mode", "passthrough"])
            .raw_rgb_output();

        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        if let Some(cancel_rx) = &self.cancel_rx {
            runner = runner.with_cancel(cancel_rx.clone());
        }

        let bytes_per_frame = width as usize * height as usize * 3;
        let raw = runner.capture_frames(&cmd, bytes_per_frame).await.map_err(|e| match e {
            MediaError::FfmpegFailed { stderr, .. } => MediaError::invalid_video(format!(
                "Failed to decode video: {}",
                stderr.unwrap_or_else(|| "unknown decoder error".to_string())
            )),
            other => other,
        })?;

        if raw.trailing_bytes > 0 {
            warn!(
                bytes = raw.trailing_bytes,
                bytes_per_frame,
                "Decoder output ended mid-frame, dropping partial frame"
            );
        }
        debug!(frames = raw.frames.len(), width, height, interval, "Decoded raw frames");

        let frames = raw
            .frames
            .into_iter()
            .enumerate()
            .filter_map(|(i, bytes)| {
                RgbImage::from_raw(width, height, bytes).map(|image| DecodedFrame {
                    raw_index: i as u64 * interval,
                    image,
                })
            })
            .collect();

        Ok(frames)
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// Frames extracted from one video, with the stream info they came from.
#[derive(Debug, Clone)]
pub struct ExtractedVideo {
    pub info: VideoInfo,
    pub interval: u64,
    pub frames: Vec<Frame>,
}

/// Decodes, validates and samples video frames at a target rate.
pub struct FrameExtractor {
    decoder: Arc<dyn VideoDecoder>,
    target_fps: f64,
    max_duration: f64,
}

impl FrameExtractor {
    pub fn new(decoder: Arc<dyn VideoDecoder>, target_fps: f64, max_duration: f64) -> Self {
        Self {
            decoder,
            target_fps,
            max_duration,
        }
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Stream properties of the source.
    pub async fn get_video_info(&self, path: &Path) -> MediaResult<VideoInfo> {
        self.decoder.probe(path).await
    }

    /// Sampled frames in order.
    pub async fn extract_frames(&self, path: &Path) -> MediaResult<Vec<Frame>> {
        Ok(self.extract(path).await?.frames)
    }

    /// Validate the source, then decode and sample it.
    pub async fn extract(&self, path: &Path) -> MediaResult<ExtractedVideo> {
        let info = self.decoder.probe(path).await?;
        self.validate(&info)?;

        let interval = sampling_interval(info.fps, self.target_fps);
        let decoded = self.decoder.decode(path, &info, interval).await?;

        let frames: Vec<Frame> = decoded
            .into_iter()
            .filter(|d| d.raw_index % interval == 0)
            .filter(|d| d.image.width() > 0 && d.image.height() > 0)
            .enumerate()
            .map(|(index, d)| Frame::new(index, d.raw_index, d.image))
            .collect();

        if frames.is_empty() {
            return Err(MediaError::invalid_video("No frames extracted from video"));
        }

        info!(
            decoder = self.decoder.name(),
            source_fps = info.fps,
            source_frames = info.frame_count,
            interval,
            sampled = frames.len(),
            "Extracted frames"
        );

        Ok(ExtractedVideo {
            info,
            interval,
            frames,
        })
    }

    fn validate(&self, info: &VideoInfo) -> MediaResult<()> {
        if info.fps.is_nan() || info.fps <= 0.0 || info.fps.is_infinite() {
            return Err(MediaError::invalid_video(format!("Invalid video FPS: {}", info.fps)));
        }
        if info.duration.is_nan() || info.duration <= 0.0 {
            return Err(MediaError::invalid_video("Video has zero duration"));
        }
        if info.duration > self.max_duration {
            return Err(MediaError::invalid_video(format!(
                "Video duration ({:.1}s) exceeds maximum ({:.1}s)",
                info.duration, self.max_duration
            )));
        }
        if info.frame_count == 0 {
            return Err(MediaError::invalid_video("Video contains no frames"));
        }
        Ok(())
    }
}
