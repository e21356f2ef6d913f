//! Video download using yt-dlp.

use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::touch;
use crate::process::ProcessSpec;

/// Preferred format: a single-file mp4 when available.
pub const DEFAULT_FORMAT: &str = "best[ext=mp4]/best";

/// Title length kept in downloaded file names.
const MAX_TITLE_CHARS: usize = 50;

/// Extensions yt-dlp may produce for [`DEFAULT_FORMAT`].
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov"];

/// Metadata reported by `yt-dlp --dump-json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteVideoInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// A video available on local disk after download.
#[derive(Debug, Clone)]
pub struct DownloadedVideo {
    pub path: PathBuf,
    pub id: String,
    pub title: String,
    /// True when an earlier download was reused.
    pub reused: bool,
}

/// Timeout and cancellation for yt-dlp calls.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<watch::Receiver<bool>>,
}

/// Characters not allowed in file names on common filesystems.
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

/// Make a title safe for use as a file name stem.
pub fn safe_file_stem(title: &str, id: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(title.trim(), "_");
    let truncated: String = cleaned.chars().take(MAX_TITLE_CHARS).collect();
    if truncated.is_empty() {
        id.to_string()
    } else {
        format!("{}_{}", truncated, id)
    }
}

/// Query title, ID and duration without downloading.
pub async fn fetch_remote_info(url: &str, options: &DownloadOptions) -> MediaResult<RemoteVideoInfo> {
    check_ytdlp()?;

    let mut spec = ProcessSpec::new("yt-dlp").args(["--dump-json", "--no-download", "--no-playlist", url]);
    if let Some(limit) = options.timeout {
        spec = spec.timeout(limit);
    }
    let output = spec.run(options.cancel.clone()).await?;
    if !output.success() {
        return Err(MediaError::download_failed(format!(
            "failed to fetch video info: {}",
            output.stderr.trim()
        )));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Download `url` into `output_dir`, reusing an earlier download of the same video.
pub async fn download_video(
    url: &str,
    output_dir: impl AsRef<Path>,
    options: &DownloadOptions,
) -> MediaResult<DownloadedVideo> {
    let output_dir = output_dir.as_ref();
    tokio::fs::create_dir_all(output_dir).await?;

    let info = fetch_remote_info(url, options).await?;
    let stem = safe_file_stem(&info.title, &info.id);

    if let Some(existing) = find_download(output_dir, &stem).await? {
        info!(path = %existing.display(), "Using existing download");
        // Download cleanup keeps recently used files
        if let Err(e) = touch(&existing).await {
            warn!(path = %existing.display(), error = %e, "Failed to refresh download mtime");
        }
        return Ok(DownloadedVideo {
            path: existing,
            id: info.id,
            title: info.title,
            reused: true,
        });
    }

    let template = output_dir.join(format!("{}.%(ext)s", stem));
    info!(url = %url, output = %template.display(), "Downloading video");

    let mut spec = ProcessSpec::new("yt-dlp").args([
        "-f".to_string(),
        DEFAULT_FORMAT.to_string(),
        "-o".to_string(),
        template.to_string_lossy().into_owned(),
        "--no-playlist".to_string(),
        "--no-mtime".to_string(),
        "--newline".to_string(),
        url.to_string(),
    ]);
    if let Some(limit) = options.timeout {
        spec = spec.timeout(limit);
    }
    let output = spec.run(options.cancel.clone()).await?;

    if !output.success() {
        return Err(MediaError::download_failed(format!(
            "yt-dlp exited with {:?}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }

    let path = find_download(output_dir, &stem)
        .await?
        .ok_or_else(|| MediaError::download_failed("downloaded file not found"))?;

    debug!(path = %path.display(), "Download complete");
    Ok(DownloadedVideo {
        path,
        id: info.id,
        title: info.title,
        reused: false,
    })
}

/// Non-empty `<stem>.<ext>` file in `dir` with a known video extension.
async fn find_download(dir: &Path, stem: &str) -> MediaResult<Option<PathBuf>> {
    for ext in VIDEO_EXTENSIONS {
        let candidate = dir.join(format!("{}.{}", stem, ext));
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => return Ok(Some(candidate)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
