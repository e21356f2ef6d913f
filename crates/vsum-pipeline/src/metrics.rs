//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; the binary installs no exporter,
//! so these are no-ops unless a recorder is set by an embedding application.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Extractions by result (`hit`, `miss`, `failed`).
    pub const EXTRACTIONS_TOTAL: &str = "vsum_extractions_total";

    /// Extraction tool latency in seconds.
    pub const EXTRACTION_SECONDS: &str = "vsum_extraction_seconds";

    /// Cache entries evicted by reason.
    pub const EVICTIONS_TOTAL: &str = "vsum_cache_evictions_total";

    /// Bytes freed by eviction.
    pub const EVICTED_BYTES_TOTAL: &str = "vsum_cache_evicted_bytes_total";

    /// AI invocations by provider and outcome.
    pub const AI_INVOCATIONS_TOTAL: &str = "vsum_ai_invocations_total";

    /// AI retries by provider.
    pub const AI_RETRIES_TOTAL: &str = "vsum_ai_retries_total";

    /// Switches to a fallback provider.
    pub const AI_FALLBACKS_TOTAL: &str = "vsum_ai_fallbacks_total";

    /// AI invocation latency in seconds.
    pub const AI_LATENCY_SECONDS: &str = "vsum_ai_latency_seconds";

    /// Completed runs by outcome and final stage.
    pub const RUNS_TOTAL: &str = "vsum_runs_total";
}

pub fn record_extraction(result: &'static str) {
    counter!(names::EXTRACTIONS_TOTAL, "result" => result).increment(1);
}

pub fn record_extraction_latency(latency_ms: f64) {
    histogram!(names::EXTRACTION_SECONDS).record(latency_ms / 1000.0);
}

pub fn record_eviction(reason: &'static str, bytes: u64) {
    counter!(names::EVICTIONS_TOTAL, "reason" => reason).increment(1);
    counter!(names::EVICTED_BYTES_TOTAL, "reason" => reason).increment(bytes);
}

pub fn record_ai_invocation(provider: &str, outcome: &'static str, latency_ms: f64) {
    counter!(
        names::AI_INVOCATIONS_TOTAL,
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(names::AI_LATENCY_SECONDS, "provider" => provider.to_string())
        .record(latency_ms / 1000.0);
}

pub fn record_ai_retry(provider: &str) {
    counter!(names::AI_RETRIES_TOTAL, "provider" => provider.to_string()).increment(1);
}

pub fn record_ai_fallback(from: &str, to: &str) {
    counter!(
        names::AI_FALLBACKS_TOTAL,
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_run(outcome: &'static str, stage: &'static str) {
    counter!(names::RUNS_TOTAL, "outcome" => outcome, "stage" => stage).increment(1);
}
