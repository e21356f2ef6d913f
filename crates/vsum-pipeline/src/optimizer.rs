//! Frame-interval optimizer.
//!
//! Maps a video duration and a model frame budget to an [`ExtractionPlan`].
//! Everything here is pure and deterministic.

use serde::Serialize;
use vsum_models::{ExtractionPlan, Provider};

/// Image limits of an AI provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderLimits {
    /// Hard cap on images per request
    pub max_images: u32,
    /// Count beyond which cost and latency grow noticeably
    pub recommended_images: u32,
    /// Approximate prompt tokens per frame
    pub tokens_per_image: u32,
}

impl ProviderLimits {
    pub const GEMINI: ProviderLimits = ProviderLimits {
        max_images: 3600,
        recommended_images: 200,
        tokens_per_image: 258,
    };

    pub const CLAUDE: ProviderLimits = ProviderLimits {
        max_images: 100,
        recommended_images: 80,
        tokens_per_image: 1500,
    };

    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Gemini => Self::GEMINI,
            Provider::Claude => Self::CLAUDE,
        }
    }
}

/// How a plan compares to a provider's limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanValidation {
    WithinBudget,
    /// Accepted, but more frames than recommended.
    OverRecommended { frames: u32, recommended: u32 },
    /// More frames than the provider accepts.
    OverMaximum { frames: u32, max: u32 },
}

/// Chooses extraction plans from duration and frame budget.
#[derive(Debug, Clone, Copy)]
pub struct ContextOptimizer {
    average_keyframe_period: f64,
    min_interval: u32,
    max_interval: u32,
}

impl Default for ContextOptimizer {
    fn default() -> Self {
        Self {
            average_keyframe_period: 1.5,
            min_interval: 1,
            max_interval: 60,
        }
    }
}

impl ContextOptimizer {
    pub fn new(average_keyframe_period: f64) -> Self {
        Self {
            average_keyframe_period: if average_keyframe_period.is_finite()
                && average_keyframe_period > 0.0
            {
                average_keyframe_period
            } else {
                1.5
            },
            ..Default::default()
        }
    }

    /// Longest duration for which all keyframes fit in `budget`.
    pub fn keyframe_threshold(&self, budget: u32) -> f64 {
        budget.max(1) as f64 * self.average_keyframe_period
    }

    /// Expected keyframe count for a duration.
    pub fn estimate_keyframes(&self, duration_seconds: f64) -> u32 {
        frames_for(duration_seconds, self.average_keyframe_period)
    }

    /// Plan for `duration_seconds` under a frame `budget`.
    ///
    /// The caller rejects non-positive durations before planning.
    pub fn plan(&self, duration_seconds: f64, budget: u32) -> ExtractionPlan {
        let budget = budget.max(1);
        if duration_seconds <= self.keyframe_threshold(budget) {
            return ExtractionPlan::all_keyframes(self.estimate_keyframes(duration_seconds));
        }

        let raw = (duration_seconds / budget as f64).ceil();
        let interval = (raw as u32).clamp(self.min_interval, self.max_interval);
        ExtractionPlan::fixed_interval(interval, frames_for(duration_seconds, interval as f64))
    }

    /// Plan for an explicit user interval.
    pub fn with_interval(&self, duration_seconds: f64, seconds: u32) -> ExtractionPlan {
        let seconds = seconds.max(1);
        ExtractionPlan::fixed_interval(seconds, frames_for(duration_seconds, seconds as f64))
    }

    pub fn validate(&self, plan: &ExtractionPlan, limits: &ProviderLimits) -> PlanValidation {
        let frames = plan.target_frame_count;
        if frames > limits.max_images {
            PlanValidation::OverMaximum {
                frames,
                max: limits.max_images,
            }
        } else if frames > limits.recommended_images {
            PlanValidation::OverRecommended {
                frames,
                recommended: limits.recommended_images,
            }
        } else {
            PlanValidation::WithinBudget
        }
    }

    /// Approximate prompt tokens spent on `frame_count` images.
    pub fn estimate_tokens(&self, frame_count: u32, limits: &ProviderLimits) -> u64 {
        frame_count as u64 * limits.tokens_per_image as u64
    }
}

fn frames_for(duration_seconds: f64, period: f64) -> u32 {
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 || period <= 0.0 {
        return 0;
    }
    (duration_seconds / period).floor().min(u32::MAX as f64) as u32
}
