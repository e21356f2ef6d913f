//! Structured run logging.

use tracing::{error, info, warn, Span};
use vsum_models::RecordId;

/// Logger carrying the record ID and source of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunLogger {
    record_id: String,
    source: String,
}

impl RunLogger {
    pub fn new(record_id: &RecordId, source: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            source: source.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            record_id = %self.record_id,
            source = %self.source,
            "Run started: {}", message
        );
    }

    pub fn log_stage(&self, stage: &str) {
        info!(
            record_id = %self.record_id,
            stage = %stage,
            "Entering stage"
        );
    }

    pub fn log_progress(&self, stage: &str, message: &str) {
        info!(
            record_id = %self.record_id,
            stage = %stage,
            "{}", message
        );
    }

    pub fn log_warning(&self, stage: &str, message: &str) {
        warn!(
            record_id = %self.record_id,
            stage = %stage,
            "{}", message
        );
    }

    pub fn log_failure(&self, stage: &str, kind: &str, message: &str) {
        error!(
            record_id = %self.record_id,
            stage = %stage,
            error_kind = %kind,
            "Run failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            record_id = %self.record_id,
            source = %self.source,
            "Run completed: {}", message
        );
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Span wrapping the whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "run",
            record_id = %self.record_id,
            source = %self.source
        )
    }
}
