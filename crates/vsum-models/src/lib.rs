//! Shared data models for the vsum analysis pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video sources and their resolved identity
//! - Frame extraction plans
//! - Analysis records and history summaries
//! - AI providers and output languages
//! - URL helpers for remote sources

pub mod plan;
pub mod provider;
pub mod record;
pub mod source;
pub mod utils;

// Re-export common types
pub use plan::{ExtractionMode, ExtractionPlan};
pub use provider::{Language, ModelName, Provider};
pub use record::{AnalysisRecord, RecordId, RecordStatus, RecordSummary};
pub use source::{MediaInfo, SourceRef, VideoSource};
pub use utils::{
    extract_youtube_id, format_duration, is_remote_url, is_youtube_url, YoutubeIdError,
    YoutubeIdResult,
};
