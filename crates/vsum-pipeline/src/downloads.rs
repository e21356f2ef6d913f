//! Videos fetched by yt-dlp.
//!
//! Downloads are kept for reuse by later runs and are not bounded by the
//! cache ceiling. Cleanup leaves files touched within a grace period alone,
//! since a run may be downloading or reading them.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::PipelineResult;

/// Size of the downloads directory.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStats {
    pub dir: PathBuf,
    pub exists: bool,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Outcome of a downloads cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadCleanup {
    pub removed: usize,
    pub freed_bytes: u64,
    /// Files modified within the grace period
    pub skipped: usize,
}

pub async fn download_stats(dir: impl AsRef<Path>) -> PipelineResult<DownloadStats> {
    let dir = dir.as_ref();
    let mut stats = DownloadStats {
        dir: dir.to_path_buf(),
        exists: fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false),
        file_count: 0,
        total_bytes: 0,
    };
    if !stats.exists {
        return Ok(stats);
    }

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                stats.file_count += 1;
                stats.total_bytes += meta.len();
            }
        }
    }
    Ok(stats)
}

/// Delete downloaded files not modified within `grace`.
///
/// Only regular files directly under `dir` are considered.
pub async fn clean_downloads(dir: impl AsRef<Path>, grace: Duration) -> PipelineResult<DownloadCleanup> {
    let dir = dir.as_ref();
    let mut summary = DownloadCleanup::default();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summary),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let recent = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age < grace)
            .unwrap_or(true);
        if recent {
            summary.skipped += 1;
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => {
                summary.removed += 1;
                summary.freed_bytes += meta.len();
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove download"),
        }
    }

    info!(
        dir = %dir.display(),
        removed = summary.removed,
        freed_bytes = summary.freed_bytes,
        skipped = summary.skipped,
        "Downloads cleaned"
    );
    Ok(summary)
}
