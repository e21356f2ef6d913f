//! Analysis records persisted to history and sidecar files.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{ExtractionPlan, Language, ModelName, Provider};

/// Unique identifier for an analysis record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generate a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used in listings.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of the run that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failed => "failed",
        }
    }
}

/// One analysis run, successful or not.
///
/// Created once when the run reaches the persisting stage and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisRecord {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    /// Path or URL exactly as given by the user.
    pub source_reference: String,
    /// File name of the analyzed video (or the URL for unresolved sources).
    pub video_name: String,
    /// Cache identity of the source, absent when resolution failed.
    #[serde(default)]
    pub content_hash: Option<String>,
    pub provider: Provider,
    pub model: ModelName,
    pub language: Language,
    #[serde(default)]
    pub plan: Option<ExtractionPlan>,
    pub frame_count: u32,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub resolution: Option<(u32, u32)>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub prompt_used: Option<String>,
    pub summary_text: String,
    pub status: RecordStatus,
    /// Stage that failed, for failed runs.
    #[serde(default)]
    pub failed_stage: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisRecord {
    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }

    /// Whether this record's identifier starts with `prefix`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.id.as_str().starts_with(prefix)
    }

    /// Summary text truncated to `max_chars` characters, with an ellipsis.
    pub fn preview(&self, max_chars: usize) -> String {
        let text = self.summary_text.trim();
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }

    pub fn summary(&self, preview_chars: usize) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            video_name: self.video_name.clone(),
            duration_seconds: self.duration_seconds,
            frame_count: self.frame_count,
            model: self.model.clone(),
            status: self.status,
            preview: self.preview(preview_chars),
        }
    }
}

/// Condensed view of a record used by history listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordSummary {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub video_name: String,
    pub duration_seconds: Option<f64>,
    pub frame_count: u32,
    pub model: ModelName,
    pub status: RecordStatus,
    pub preview: String,
}
