//! Analysis history and sidecar files.
//!
//! History is one JSON document rewritten on every append. Writers hold an
//! in-process mutex and an exclusive lock file next to the history, so
//! concurrent `vsum` processes never interleave their read-modify-write.
//! Readers need no lock: the document is replaced by rename.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use vsum_models::AnalysisRecord;

use crate::error::{PipelineError, PipelineResult};
use crate::lockfile::{LockFile, LockPolicy};

pub const HISTORY_FILE: &str = "analysis_history.json";
pub const SIDECAR_SUFFIX: &str = ".analysis.json";
const HISTORY_VERSION: u32 = 1;
const SIDECAR_VERSION: u32 = 1;

/// Lock files older than this are left over from a crashed process.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct HistoryDocument {
    version: u32,
    #[serde(default)]
    records: Vec<AnalysisRecord>,
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarMetadata {
    version: u32,
    written_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarDocument {
    #[serde(flatten)]
    record: AnalysisRecord,
    #[serde(rename = "_metadata")]
    metadata: SidecarMetadata,
}

/// Sidecar location for a video: `<video>.analysis.json`.
pub fn sidecar_path(video_path: &Path) -> PathBuf {
    let mut name = video_path.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Persists [`AnalysisRecord`]s.
#[derive(Debug)]
pub struct MetadataStore {
    history_path: PathBuf,
    lock_path: PathBuf,
    write_lock: Mutex<()>,
    lock_timeout: Duration,
}

impl MetadataStore {
    pub fn new(history_path: impl Into<PathBuf>) -> Self {
        let history_path = history_path.into();
        let mut lock_name = history_path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_name),
            history_path,
            write_lock: Mutex::new(()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Append a record to the history.
    pub async fn append(&self, record: &AnalysisRecord) -> PipelineResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.history_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::store(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let policy = LockPolicy::new(LOCK_STALE_AFTER, Some(self.lock_timeout));
        let _file_lock = LockFile::acquire(&self.lock_path, policy).await.map_err(|e| {
            PipelineError::store(format!("cannot lock history {}: {}", self.lock_path.display(), e))
        })?;

        let mut document = self.read_document().await?;
        document.records.push(record.clone());
        self.write_document(&document).await?;

        info!(
            record_id = %record.id,
            status = record.status.as_str(),
            total = document.records.len(),
            "Record appended to history"
        );
        Ok(())
    }

    /// All records in append order.
    pub async fn load(&self) -> PipelineResult<Vec<AnalysisRecord>> {
        Ok(self.read_document().await?.records)
    }

    /// Records, most recent first.
    pub async fn list(&self, limit: Option<usize>) -> PipelineResult<Vec<AnalysisRecord>> {
        let records = self.load().await?;
        let limit = limit.unwrap_or(usize::MAX);
        Ok(records.into_iter().rev().take(limit).collect())
    }

    /// The single record whose ID starts with `prefix`.
    pub async fn find_by_id_prefix(&self, prefix: &str) -> PipelineResult<AnalysisRecord> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(PipelineError::not_found("empty record identifier"));
        }

        let mut matches: Vec<AnalysisRecord> = self
            .load()
            .await?
            .into_iter()
            .filter(|r| r.matches_prefix(prefix))
            .collect();

        match matches.len() {
            0 => Err(PipelineError::not_found(format!("no record with ID starting '{}'", prefix))),
            1 => Ok(matches.remove(0)),
            count => Err(PipelineError::AmbiguousId {
                prefix: prefix.to_string(),
                count,
            }),
        }
    }

    /// Write `<video>.analysis.json`, replacing an earlier one.
    pub async fn write_sidecar(&self, video_path: &Path, record: &AnalysisRecord) -> PipelineResult<PathBuf> {
        let path = sidecar_path(video_path);
        let document = SidecarDocument {
            record: record.clone(),
            metadata: SidecarMetadata {
                version: SIDECAR_VERSION,
                written_at: Utc::now(),
            },
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomic(&path, &bytes).await?;
        debug!(path = %path.display(), record_id = %record.id, "Sidecar written");
        Ok(path)
    }

    /// Record stored next to `video_path`, if any.
    pub async fn read_sidecar(&self, video_path: &Path) -> PipelineResult<Option<AnalysisRecord>> {
        let path = sidecar_path(video_path);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::store(format!("cannot read {}: {}", path.display(), e)));
            }
        };
        let document: SidecarDocument = serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::store(format!("corrupt sidecar {}: {}", path.display(), e)))?;
        Ok(Some(document.record))
    }

    async fn read_document(&self) -> PipelineResult<HistoryDocument> {
        let bytes = match fs::read(&self.history_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HistoryDocument::default()),
            Err(e) => {
                return Err(PipelineError::store(format!(
                    "cannot read history {}: {}",
                    self.history_path.display(),
                    e
                )));
            }
        };

        let document: HistoryDocument = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::store(format!("corrupt history {}: {}", self.history_path.display(), e))
        })?;
        if document.version != HISTORY_VERSION {
            return Err(PipelineError::store(format!(
                "unsupported history version {} in {}",
                document.version,
                self.history_path.display()
            )));
        }
        Ok(document)
    }

    async fn write_document(&self, document: &HistoryDocument) -> PipelineResult<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        write_atomic(&self.history_path, &bytes).await
    }
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp_name);

    let result = async {
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await
    }
    .await;

    result.map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        PipelineError::store(format!("cannot write {}: {}", path.display(), e))
    })
}
