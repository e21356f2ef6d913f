//! Frame extraction plans.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How frames are sampled from a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Every keyframe (I-frame) in the video.
    AllKeyframes,
    /// One frame every `seconds` seconds.
    FixedInterval { seconds: u32 },
}

impl ExtractionMode {
    /// Short stable tag used in cache directory names.
    pub fn tag(&self) -> String {
        match self {
            ExtractionMode::AllKeyframes => "kf".to_string(),
            ExtractionMode::FixedInterval { seconds } => format!("i{}", seconds),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::AllKeyframes => "all_keyframes",
            ExtractionMode::FixedInterval { .. } => "interval",
        }
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMode::AllKeyframes => write!(f, "all keyframes"),
            ExtractionMode::FixedInterval { seconds } => write!(f, "every {}s", seconds),
        }
    }
}

/// The sampling decision for one video and model budget.
///
/// Pure data: building a plan has no side effects. Two plans with the same
/// mode address the same cache entry, `target_frame_count` is an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionPlan {
    #[serde(flatten)]
    pub mode: ExtractionMode,
    /// Expected number of frames the plan produces.
    pub target_frame_count: u32,
}

impl ExtractionPlan {
    pub fn all_keyframes(target_frame_count: u32) -> Self {
        Self {
            mode: ExtractionMode::AllKeyframes,
            target_frame_count,
        }
    }

    pub fn fixed_interval(seconds: u32, target_frame_count: u32) -> Self {
        Self {
            mode: ExtractionMode::FixedInterval { seconds },
            target_frame_count,
        }
    }

    /// Sampling interval in seconds, `None` for keyframe extraction.
    pub fn interval_seconds(&self) -> Option<u32> {
        match self.mode {
            ExtractionMode::AllKeyframes => None,
            ExtractionMode::FixedInterval { seconds } => Some(seconds),
        }
    }

    pub fn is_keyframes(&self) -> bool {
        matches!(self.mode, ExtractionMode::AllKeyframes)
    }

    /// Human readable description, e.g. "every 5s (~180 frames)".
    pub fn describe(&self) -> String {
        format!("{} (~{} frames)", self.mode, self.target_frame_count)
    }
}
