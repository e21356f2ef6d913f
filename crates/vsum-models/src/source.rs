//! Video sources as given by the user and as resolved by the pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::utils::is_remote_url;

/// A video reference before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceRef {
    Local(PathBuf),
    Remote(String),
}

impl SourceRef {
    /// Classify a raw CLI argument as a URL or a filesystem path.
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        if is_remote_url(trimmed) {
            SourceRef::Remote(trimmed.to_string())
        } else {
            SourceRef::Local(PathBuf::from(trimmed))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceRef::Remote(_))
    }

    /// The reference as the user wrote it.
    pub fn display_reference(&self) -> String {
        match self {
            SourceRef::Local(path) => path.display().to_string(),
            SourceRef::Remote(url) => url.clone(),
        }
    }

    /// Best-effort display name before resolution.
    pub fn display_name(&self) -> String {
        match self {
            SourceRef::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SourceRef::Remote(url) => url.clone(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_reference())
    }
}

/// Stream properties reported by the probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub size_bytes: u64,
    /// Title reported by the downloader for remote sources.
    #[serde(default)]
    pub title: Option<String>,
}

impl MediaInfo {
    pub fn resolution(&self) -> Option<(u32, u32)> {
        if self.width > 0 && self.height > 0 {
            Some((self.width, self.height))
        } else {
            None
        }
    }
}

/// A resolved, probed video ready for extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoSource {
    pub reference: SourceRef,
    /// Local file the frames are extracted from (the download for remote sources).
    pub local_path: PathBuf,
    pub duration_seconds: f64,
    /// Stable content identity used as the cache key.
    pub content_hash: String,
    pub info: MediaInfo,
}

impl VideoSource {
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn is_remote(&self) -> bool {
        self.reference.is_remote()
    }

    /// File name for local sources, title (or downloaded file name) for remote ones.
    pub fn display_name(&self) -> String {
        if let Some(title) = self.info.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.reference.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_ref() {
        assert_eq!(
            SourceRef::parse("https://youtu.be/dQw4w9WgXcQ"),
            SourceRef::Remote("https://youtu.be/dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            SourceRef::parse(" ./clips/a.mp4 "),
            SourceRef::Local(PathBuf::from("./clips/a.mp4"))
        );
    }

    #[test]
    fn test_display_name_prefers_title() {
        let mut source = VideoSource {
            reference: SourceRef::parse("https://youtu.be/dQw4w9WgXcQ"),
            local_path: PathBuf::from("/data/downloads/dQw4w9WgXcQ.mp4"),
            duration_seconds: 212.0,
            content_hash: "dQw4w9WgXcQ".to_string(),
            info: MediaInfo::default(),
        };
        assert_eq!(source.display_name(), "dQw4w9WgXcQ.mp4");
        source.info.title = Some("Never Gonna Give You Up".to_string());
        assert_eq!(source.display_name(), "Never Gonna Give You Up");
    }

    #[test]
    fn test_resolution_requires_both_dimensions() {
        let info = MediaInfo {
            width: 1920,
            ..Default::default()
        };
        assert_eq!(info.resolution(), None);
    }
}
