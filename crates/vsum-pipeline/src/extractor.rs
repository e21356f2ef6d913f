//! Frame extraction into the cache.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};
use vsum_media::{
    check_ffmpeg, frame_filter, list_frames, wait_for_cancel, FfmpegCommand, FfmpegOutcome,
    FfmpegRunner, MediaResult, FRAME_PATTERN, JPEG_QUALITY,
};
use vsum_models::{ExtractionPlan, VideoSource};

use crate::cache::{CacheEntry, CacheKey, CacheManager, CachePin};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

/// Estimated size of one scaled JPEG frame, used for cache reservations.
pub const ESTIMATED_FRAME_BYTES: u64 = 150 * 1024;

/// External tool that samples frames from a video.
#[async_trait]
pub trait FrameTool: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Write frames matching `output_pattern` using the video filter `filter`.
    async fn run(
        &self,
        input: &Path,
        filter: &str,
        output_pattern: &Path,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<FfmpegOutcome>;
}

/// FFmpeg-backed [`FrameTool`].
#[derive(Debug, Clone)]
pub struct FfmpegFrameTool {
    timeout: Duration,
}

impl FfmpegFrameTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl FrameTool for FfmpegFrameTool {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_available(&self) -> bool {
        check_ffmpeg().is_ok()
    }

    async fn run(
        &self,
        input: &Path,
        filter: &str,
        output_pattern: &Path,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<FfmpegOutcome> {
        let cmd = FfmpegCommand::new(input, output_pattern)
            .video_filter(filter)
            .variable_frame_rate()
            .jpeg_quality(JPEG_QUALITY);

        let mut runner = FfmpegRunner::new().with_timeout(self.timeout.as_secs().max(1));
        if let Some(rx) = cancel {
            runner = runner.with_cancel(rx);
        }
        runner.run(&cmd).await
    }
}

/// Frames ready for analysis, pinned in the cache while held.
#[derive(Debug)]
pub struct ExtractedFrames {
    pub entry: CacheEntry,
    pub pin: CachePin,
    /// True when no extraction ran
    pub cache_hit: bool,
}

/// Produces cache entries for (video, plan) pairs.
pub struct FrameExtractor {
    cache: Arc<CacheManager>,
    tool: Arc<dyn FrameTool>,
    max_frame_width: u32,
}

impl FrameExtractor {
    pub fn new(cache: Arc<CacheManager>, tool: Arc<dyn FrameTool>, max_frame_width: u32) -> Self {
        Self {
            cache,
            tool,
            max_frame_width,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Return cached frames for `plan`, extracting them first if needed.
    ///
    /// Runs sharing a content hash, in this process or another, extract one
    /// at a time; a waiting run reuses what the first one committed.
    pub async fn extract(
        &self,
        source: &VideoSource,
        plan: &ExtractionPlan,
        cancel: Option<watch::Receiver<bool>>,
    ) -> PipelineResult<ExtractedFrames> {
        let key = CacheKey::for_plan(&source.content_hash, plan);

        if let Some(hit) = self.reuse(&key).await? {
            return Ok(hit);
        }

        let mut cancel_rx = cancel.clone();
        let _lock = tokio::select! {
            lock = self.cache.lock_content(&source.content_hash) => lock?,
            _ = wait_for_cancel(cancel_rx.as_mut()) => return Err(PipelineError::Cancelled),
        };

        if let Some(hit) = self.reuse(&key).await? {
            debug!(content_hash = %source.content_hash, "Reusing frames extracted by a concurrent run");
            return Ok(hit);
        }

        if !self.tool.is_available() {
            metrics::record_extraction("failed");
            return Err(PipelineError::extraction(format!(
                "{} is not installed or not on PATH",
                self.tool.name()
            )));
        }

        let estimate = u64::from(plan.target_frame_count.max(1)) * ESTIMATED_FRAME_BYTES;
        let admission = self.cache.reserve(&key, estimate).await?;
        let pattern = admission.staging_dir().join(FRAME_PATTERN);
        let filter = frame_filter(&plan.mode, self.max_frame_width);

        info!(
            content_hash = %source.content_hash,
            plan = %plan.describe(),
            tool = self.tool.name(),
            "Extracting frames"
        );

        let started = Instant::now();
        let outcome = self
            .tool
            .run(source.local_path(), &filter, &pattern, cancel)
            .await
            .map_err(|e| PipelineError::from_media(e, PipelineError::Extraction))?;
        metrics::record_extraction_latency(started.elapsed().as_secs_f64() * 1000.0);

        if !outcome.success() {
            metrics::record_extraction("failed");
            let detail = outcome.error_output();
            let last_line = detail.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(PipelineError::extraction(format!(
                "{} exited with status {:?}: {}",
                self.tool.name(),
                outcome.exit_code,
                last_line.trim()
            )));
        }

        let staged = list_frames(admission.staging_dir())
            .await
            .map_err(|e| PipelineError::from_media(e, PipelineError::Extraction))?;
        if staged.is_empty() {
            metrics::record_extraction("failed");
            return Err(PipelineError::extraction(format!(
                "{} produced no frames for {}",
                self.tool.name(),
                source.display_name()
            )));
        }

        let entry = self.cache.commit(admission, plan, &source.display_name()).await?;
        let pin = self
            .cache
            .pin(&key)
            .ok_or_else(|| PipelineError::cache("entry evicted immediately after commit"))?;

        metrics::record_extraction("miss");
        info!(
            content_hash = %source.content_hash,
            frames = entry.frame_count(),
            size_bytes = entry.size_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frames extracted"
        );

        Ok(ExtractedFrames {
            entry,
            pin,
            cache_hit: false,
        })
    }

    async fn reuse(&self, key: &CacheKey) -> PipelineResult<Option<ExtractedFrames>> {
        Ok(self.cache.checkout(key).await?.map(|(entry, pin)| {
            metrics::record_extraction("hit");
            info!(
                content_hash = %key.content_hash,
                frames = entry.frame_count(),
                "Using cached frames"
            );
            ExtractedFrames {
                entry,
                pin,
                cache_hit: true,
            }
        }))
    }
}
