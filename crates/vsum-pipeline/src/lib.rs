//! Video summarization pipeline.
//!
//! Turns a video reference into cached frames, an AI-generated summary and
//! a persisted [`vsum_models::AnalysisRecord`]:
//!
//! - [`optimizer`]: frame budget to extraction plan
//! - [`cache`]: size-bounded frame store with LRU eviction, shared between
//!   processes
//! - [`downloads`]: size and cleanup of fetched videos
//! - [`extractor`]: ffmpeg frame sampling into the cache
//! - [`connector`]: AI CLI invocation with retry and fallback
//! - [`store`]: history and sidecar persistence
//! - [`orchestrator`]: the staged run tying them together

pub mod cache;
pub mod config;
pub mod connector;
pub mod downloads;
pub mod error;
pub mod extractor;
pub mod lockfile;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod optimizer;
pub mod orchestrator;
pub mod source;
pub mod store;

pub use cache::{CacheEntry, CacheKey, CacheManager, CachePin, CacheStats, ContentLock, EvictionSummary};
pub use config::{FrameBudgets, PipelineConfig};
pub use connector::{AiConnector, AiProvider, AnalysisOutcome, AnalysisRequest, AnalysisText};
pub use downloads::{clean_downloads, download_stats, DownloadCleanup, DownloadStats};
pub use error::{PipelineError, PipelineResult};
pub use extractor::{ExtractedFrames, FfmpegFrameTool, FrameExtractor, FrameTool};
pub use locks::{KeyGuard, KeyedLocks};
pub use optimizer::{ContextOptimizer, PlanValidation, ProviderLimits};
pub use orchestrator::{
    AnalysisOrchestrator, AnalyzeRequest, Collaborators, IntervalChoice, RunReport, Stage, StageFailure,
};
pub use source::{Downloader, MediaProbe, SourceResolver};
pub use store::MetadataStore;
