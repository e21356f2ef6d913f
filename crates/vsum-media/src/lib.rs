//! External-process wrappers for the vsum pipeline.
//!
//! This crate provides:
//! - A subprocess runner with stdin, timeout and cancellation
//! - Type-safe FFmpeg command building for frame extraction
//! - Progress parsing from `-progress pipe:2`
//! - FFprobe metadata and yt-dlp downloads

pub mod command;
pub mod download;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod process;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegOutcome, FfmpegRunner};
pub use download::{
    download_video, fetch_remote_info, DownloadOptions, DownloadedVideo, RemoteVideoInfo,
};
pub use error::{MediaError, MediaResult};
pub use filters::{frame_filter, DEFAULT_MAX_WIDTH, FRAME_PATTERN, JPEG_QUALITY};
pub use fs_utils::{dir_size, list_frames, touch};
pub use probe::{probe_video, probe_video_with, VideoInfo};
pub use process::{wait_for_cancel, ProcessOutput, ProcessSpec};
pub use progress::FfmpegProgress;
