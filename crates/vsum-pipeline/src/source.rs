//! Resolving a source reference to a probed local video.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info};
use vsum_media::{
    check_ffprobe, check_ytdlp, download_video, probe_video_with, DownloadOptions,
    DownloadedVideo, MediaResult, VideoInfo,
};
use vsum_models::{extract_youtube_id, MediaInfo, SourceRef, VideoSource};

use crate::error::{PipelineError, PipelineResult};

/// Reads duration and stream information from a local video.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    fn is_available(&self) -> bool;

    async fn probe(&self, path: &Path, cancel: Option<watch::Receiver<bool>>) -> MediaResult<VideoInfo>;
}

/// Fetches a remote video to local disk.
#[async_trait]
pub trait Downloader: Send + Sync {
    fn is_available(&self) -> bool;

    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<DownloadedVideo>;
}

#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    fn is_available(&self) -> bool {
        check_ffprobe().is_ok()
    }

    async fn probe(&self, path: &Path, cancel: Option<watch::Receiver<bool>>) -> MediaResult<VideoInfo> {
        probe_video_with(path, Some(self.timeout), cancel).await
    }
}

#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    timeout: Duration,
}

impl YtDlpDownloader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    fn is_available(&self) -> bool {
        check_ytdlp().is_ok()
    }

    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<DownloadedVideo> {
        let options = DownloadOptions {
            timeout: Some(self.timeout),
            cancel,
        };
        download_video(url, output_dir, &options).await
    }
}

/// Content identity of a local file: name, size and modification time.
pub fn local_content_hash(path: &Path, size_bytes: u64, modified_secs: u64) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{}|{}|{}", name, size_bytes, modified_secs).as_bytes());
    format!("{:x}", digest)
}

/// Content identity of a remote source.
///
/// - Uses the YouTube video ID when available
/// - Falls back to SHA-256 of the URL
pub fn remote_content_hash(url: &str) -> String {
    if let Ok(id) = extract_youtube_id(url) {
        return id;
    }
    let digest = Sha256::digest(url.trim().as_bytes());
    format!("{:x}", digest)
}

/// Turns a [`SourceRef`] into a [`VideoSource`].
pub struct SourceResolver {
    probe: Arc<dyn MediaProbe>,
    downloader: Arc<dyn Downloader>,
    downloads_dir: PathBuf,
}

impl SourceResolver {
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        downloader: Arc<dyn Downloader>,
        downloads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            probe,
            downloader,
            downloads_dir: downloads_dir.into(),
        }
    }

    pub async fn resolve(
        &self,
        reference: &SourceRef,
        cancel: Option<watch::Receiver<bool>>,
    ) -> PipelineResult<VideoSource> {
        let (local_path, content_hash, title) = match reference {
            SourceRef::Local(path) => {
                let meta = tokio::fs::metadata(path).await.map_err(|e| {
                    PipelineError::source_resolution(format!("cannot read {}: {}", path.display(), e))
                })?;
                if !meta.is_file() {
                    return Err(PipelineError::source_resolution(format!(
                        "{} is not a file",
                        path.display()
                    )));
                }
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let hash = local_content_hash(path, meta.len(), modified);
                (path.clone(), hash, None)
            }
            SourceRef::Remote(url) => {
                if !self.downloader.is_available() {
                    return Err(PipelineError::source_resolution(
                        "yt-dlp is required for remote sources but was not found",
                    ));
                }
                info!(url = %url, "Downloading remote source");
                let downloaded = self
                    .downloader
                    .download(url, &self.downloads_dir, cancel.clone())
                    .await
                    .map_err(|e| PipelineError::from_media(e, PipelineError::SourceResolution))?;
                debug!(path = %downloaded.path.display(), reused = downloaded.reused, "Remote source on disk");
                let title = Some(downloaded.title).filter(|t| !t.is_empty());
                (downloaded.path, remote_content_hash(url), title)
            }
        };

        let probed = self
            .probe
            .probe(&local_path, cancel)
            .await
            .map_err(|e| PipelineError::from_media(e, PipelineError::SourceResolution))?;

        if !probed.duration.is_finite() || probed.duration <= 0.0 {
            return Err(PipelineError::source_resolution(format!(
                "{} has no positive duration ({})",
                local_path.display(),
                probed.duration
            )));
        }

        let size_bytes = if probed.size > 0 {
            probed.size
        } else {
            tokio::fs::metadata(&local_path).await.map(|m| m.len()).unwrap_or(0)
        };

        info!(
            content_hash = %content_hash,
            duration = probed.duration,
            width = probed.width,
            height = probed.height,
            "Source resolved"
        );

        Ok(VideoSource {
            reference: reference.clone(),
            local_path,
            duration_seconds: probed.duration,
            content_hash,
            info: MediaInfo {
                width: probed.width,
                height: probed.height,
                fps: probed.fps,
                codec: probed.codec,
                size_bytes,
                title,
            },
        })
    }
}
