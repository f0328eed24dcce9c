//! Evidence encoding: JPEG stills and H.264 clips.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::path::Path;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner, PIPE};
use crate::error::{MediaError, MediaResult};

/// JPEG quality for evidence frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> MediaResult<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| MediaError::encoding_failed(format!("JPEG encoding failed: {}", e)))?;
    Ok(buffer)
}

/// Encode frames, in order, into an H.264 MP4 at `fps`.
///
/// All frames must share the first frame's dimensions.
pub async fn encode_clip(frames: &[&RgbImage], fps: f64, output: &Path) -> MediaResult<()> {
    let first = frames
        .first()
        .ok_or_else(|| MediaError::encoding_failed("No frames to encode"))?;
    let (width, height) = first.dimensions();

    if let Some(mismatch) = frames.iter().find(|f| f.dimensions() != (width, height)) {
        return Err(MediaError::encoding_failed(format!(
            "Frame size {:?} differs from clip size {:?}",
            mismatch.dimensions(),
            (width, height)
        )));
    }
    if fps.is_nan() || fps <= 0.0 {
        return Err(MediaError::encoding_failed(format!("Invalid clip fps: {}", fps)));
    }

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut raw = Vec::with_capacity(frames.len() * (width * height * 3) as usize);
    for frame in frames {
        raw.extend_from_slice(frame.as_raw());
    }

    // yuv420p needs even dimensions.
    let cmd = FfmpegCommand::new(PIPE, output)
        .raw_rgb_input(width, height, fps)
        .video_filter("pad=ceil(iw/2)*2:ceil(ih/2)*2")
        .video_codec("libx264")
        .preset("fast")
        .crf(23)
        .pixel_format("yuv420p")
        .output_args(["-movflags", "+faststart"]);

    debug!(frames = frames.len(), width, height, fps, "Encoding clip");
    FfmpegRunner::new().run_with_input(&cmd, raw).await?;

    info!(output = %output.display(), frames = frames.len(), "Clip written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jpeg() {
        let image = RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&image, DEFAULT_JPEG_QUALITY).unwrap();
        // SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[tokio::test]
    async fn test_encode_clip_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.mp4");

        let err = encode_clip(&[], 10.0, &out).await.unwrap_err();
        assert!(matches!(err, MediaError::EncodingFailed(_)));

        let a = RgbImage::new(8, 8);
        let b = RgbImage::new(4, 4);
        let err = encode_clip(&[&a, &b], 10.0, &out).await.unwrap_err();
        assert!(matches!(err, MediaError::EncodingFailed(_)));
    }
}
