//! Pipeline error types.

use thiserror::Error;
use vsum_media::MediaError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors surfaced by pipeline stages and stores.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source resolution failed: {0}")]
    SourceResolution(String),

    #[error("Frame extraction failed: {0}")]
    Extraction(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("AI provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Identifier prefix '{prefix}' matches {count} records")]
    AmbiguousId { prefix: String, count: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn source_resolution(msg: impl Into<String>) -> Self {
        Self::SourceResolution(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Convert a media failure using `wrap` for everything except cancellation.
    pub fn from_media(err: MediaError, wrap: fn(String) -> PipelineError) -> Self {
        match err {
            MediaError::Cancelled => PipelineError::Cancelled,
            other => wrap(other.to_string()),
        }
    }

    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceResolution(_) => "source_resolution",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::Cache(_) => "cache",
            PipelineError::ProviderUnavailable(_) => "provider_unavailable",
            PipelineError::Analysis(_) => "analysis",
            PipelineError::Store(_) => "store",
            PipelineError::AmbiguousId { .. } => "ambiguous_id",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Config(_) => "config",
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "json",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
