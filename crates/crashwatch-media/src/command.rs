//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Path placeholder for FFmpeg's stdin/stdout pipes.
pub const PIPE: &str = "-";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path, or `-` for stdin
    input: PathBuf,
    /// Output file path, or `-` for stdout
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Describe a raw rgb24 input stream of the given geometry.
    pub fn raw_rgb_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            format!("{}", fps),
        ])
    }

    /// Emit raw rgb24 frames on the output.
    pub fn raw_rgb_output(self) -> Self {
        self.output_args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(format)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        if self.input.as_path() != Path::new(PIPE) {
            args.push("-nostdin".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with cancellation and timeout.
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(u64),
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            timeout_secs: None,
        }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command feeding `input` to its stdin.
    pub async fn run_with_input(&self, cmd: &FfmpegCommand, input: Vec<u8>) -> MediaResult<()> {
        self.execute(cmd, Some(input), None).await.map(|_| ())
    }

    /// Run an FFmpeg command and read its stdout as consecutive `frame_size` chunks.
    pub async fn capture_frames(&self, cmd: &FfmpegCommand, frame_size: usize) -> MediaResult<RawFrames> {
        if frame_size == 0 {
            return Err(MediaError::internal("Frame size must be non-zero"));
        }
        self.execute(cmd, None, Some(frame_size)).await
    }

    async fn execute(
        &self,
        cmd: &FfmpegCommand,
        input: Option<Vec<u8>>,
        frame_size: Option<usize>,
    ) -> MediaResult<RawFrames> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(if frame_size.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let writer = match (input, child.stdin.take()) {
            (Some(bytes), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(&bytes).await?;
                stdin.shutdown().await
            })),
            _ => None,
        };

        let reader = child
            .stdout
            .take()
            .zip(frame_size)
            .map(|(stdout, frame_size)| tokio::spawn(read_frames(stdout, frame_size)));

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        let status = self.wait_for_completion(&mut child).await;

        let stderr = match stderr_reader {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let status = status?;

        if let Some(handle) = writer {
            match handle.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                Err(e) => return Err(MediaError::internal(format!("stdin writer panicked: {}", e))),
                _ => {}
            }
        }

        let output = match reader {
            Some(handle) => handle
                .await
                .map_err(|e| MediaError::internal(format!("stdout reader panicked: {}", e)))??,
            None => RawFrames::default(),
        };

        if status.success() {
            Ok(output)
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr.trim().to_string()).filter(|s| !s.is_empty()),
                status.code(),
            ))
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<ExitStatus> {
        let timeout_secs = self.timeout_secs;

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = wait_for_cancel(self.cancel_rx.clone()) => WaitOutcome::Cancelled,
            _ = sleep_for(timeout_secs) => WaitOutcome::TimedOut(timeout_secs.unwrap_or_default()),
        };

        match outcome {
            WaitOutcome::Exited(status) => Ok(status?),
            WaitOutcome::Cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            WaitOutcome::TimedOut(secs) => {
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout(secs))
            }
        }
    }
}

/// Raw frames read from FFmpeg's stdout.
#[derive(Debug, Default)]
pub struct RawFrames {
    pub frames: Vec<Vec<u8>>,
    /// Bytes of an incomplete final frame, discarded
    pub trailing_bytes: usize,
}

/// Read `frame_size` chunks until EOF, allocating each frame once.
async fn read_frames<R: AsyncRead + Unpin>(mut reader: R, frame_size: usize) -> std::io::Result<RawFrames> {
    let mut raw = RawFrames::default();
    loop {
        let mut frame = vec![0u8; frame_size];
        let mut filled = 0;
        while filled < frame_size {
            let n = reader.read(&mut frame[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled < frame_size {
            raw.trailing_bytes = filled;
            return Ok(raw);
        }
        raw.frames.push(frame);
    }
}

async fn wait_for_cancel(cancel_rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel_rx else {
        return std::future::pending().await;
    };

    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: cancellation can no longer be requested.
            return std::future::pending().await;
        }
    }
}

async fn sleep_for(secs: Option<u64>) {
    match secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", PIPE)
            .video_filter("select='not(mod(n\\,3))'")
            .raw_rgb_output();

        let args = cmd.build_args();
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert!(args.contains(&"-nostdin".to_string()));
        assert!(args.contains(&"rawvideo".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));

        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "select='not(mod(n\\,3))'");
    }

    #[test]
    fn test_raw_input_builder() {
        let cmd = FfmpegCommand::new(PIPE, "out.mp4")
            .raw_rgb_input(64, 48, 10.0)
            .video_codec("libx264")
            .pixel_format("yuv420p");

        let args = cmd.build_args();
        assert!(!args.contains(&"-nostdin".to_string()));

        let size = args.iter().position(|a| a == "-s").unwrap();
        assert_eq!(args[size + 1], "64x48");

        // Input description must precede the -i flag.
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(size < input);
        assert_eq!(args[input + 1], "-");
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[tokio::test]
    async fn test_read_frames_splits_stream() {
        let stream: Vec<u8> = (0..25u8).collect();
        let raw = read_frames(&stream[..], 6).await.unwrap();

        assert_eq!(raw.frames.len(), 4);
        assert_eq!(raw.frames[1], vec![6, 7, 8, 9, 10, 11]);
        assert_eq!(raw.trailing_bytes, 1);
    }

    #[tokio::test]
    async fn test_read_frames_reassembles_short_reads() {
        // Reads arrive in pieces that straddle frame boundaries.
        let reader = tokio_test::io::Builder::new()
            .read(&[1, 2])
            .read(&[3, 4, 5])
            .read(&[6])
            .build();
        let raw = read_frames(reader, 3).await.unwrap();

        assert_eq!(raw.frames, vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(raw.trailing_bytes, 0);
    }

    #[tokio::test]
    async fn test_capture_frames_rejects_zero_size() {
        let cmd = FfmpegCommand::new("input.mp4", PIPE);
        let result = FfmpegRunner::new().capture_frames(&cmd, 0).await;
        assert!(matches!(result, Err(MediaError::Internal(_))));
    }

    #[tokio::test]
    async fn test_cancel_signal_resolves() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_cancel(Some(rx)));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel should resolve")
            .unwrap();
    }
}
