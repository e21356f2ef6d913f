//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::process::ProcessSpec;
use crate::progress::FfmpegProgress;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path or image pattern
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
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

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Emit frames only at their own timestamps (no duplication).
    pub fn variable_frame_rate(self) -> Self {
        self.output_arg("-vsync").output_arg("vfr")
    }

    /// JPEG quality scale, 1 (best) to 31.
    pub fn jpeg_quality(self, quality: u8) -> Self {
        self.output_arg("-q:v").output_arg(quality.clamp(1, 31).to_string())
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Result of an FFmpeg run that exited on its own.
#[derive(Debug, Clone)]
pub struct FfmpegOutcome {
    pub exit_code: Option<i32>,
    pub stderr: String,
    /// Last progress snapshot, when FFmpeg reported one.
    pub progress: Option<FfmpegProgress>,
}

impl FfmpegOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stderr with the `-progress` key/value lines removed.
    pub fn error_output(&self) -> String {
        self.stderr
            .lines()
            .filter(|line| {
                !line
                    .split_once('=')
                    .map(|(k, _)| !k.is_empty() && !k.contains(' '))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runner for FFmpeg commands with timeout and cancellation.
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
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

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command, reporting the exit code.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegOutcome> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut spec = ProcessSpec::new("ffmpeg").args(args);
        if let Some(secs) = self.timeout_secs {
            spec = spec.timeout(Duration::from_secs(secs));
        }
        let output = spec.run(self.cancel_rx.clone()).await?;

        Ok(FfmpegOutcome {
            exit_code: output.exit_code,
            progress: FfmpegProgress::parse_last(&output.stderr),
            stderr: output.stderr,
        })
    }

    /// Run an FFmpeg command, failing on a non-zero exit.
    pub async fn run_checked(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegOutcome> {
        let outcome = self.run(cmd).await?;
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(outcome.error_output()),
                outcome.exit_code,
            ))
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::tool_not_found("ffmpeg"))
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::tool_not_found("ffprobe"))
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::tool_not_found("yt-dlp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{frame_filter, FRAME_PATTERN, JPEG_QUALITY};
    use vsum_models::ExtractionMode;

    #[test]
    fn test_frame_extraction_args() {
        let mode = ExtractionMode::FixedInterval { seconds: 5 };
        let cmd = FfmpegCommand::new("/videos/talk.mp4", format!("/cache/x/{}", FRAME_PATTERN))
            .video_filter(frame_filter(&mode, 1280))
            .variable_frame_rate()
            .jpeg_quality(JPEG_QUALITY);

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/videos/talk.mp4");
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "fps=1/5,scale='min(1280,iw)':-2");
        assert!(args.windows(2).any(|w| w[0] == "-vsync" && w[1] == "vfr"));
        assert!(args.windows(2).any(|w| w[0] == "-q:v" && w[1] == "2"));
        assert_eq!(args.last().unwrap(), "/cache/x/frame_%04d.jpg");
    }

    #[test]
    fn test_error_output_strips_progress() {
        let outcome = FfmpegOutcome {
            exit_code: Some(1),
            stderr: "frame=3\nprogress=end\nInvalid data found when processing input".to_string(),
            progress: None,
        };
        assert_eq!(outcome.error_output(), "Invalid data found when processing input");
    }
}
