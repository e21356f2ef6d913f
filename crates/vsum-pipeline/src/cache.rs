//! Extracted-frame cache.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<hash>_<mode>/entry.json
//! <root>/<hash>_<mode>/frames/frame_0001.jpg
//! <root>/.lock                                   index lock
//! <root>/.staging/<hash>_<mode>-<pid>-<n>/       frames being extracted
//! <root>/.staging/<hash>_<mode>-<pid>-<n>.json   reservation
//! <root>/.pins/<hash>_<mode>-<pid>-<n>.json      entry in use by a run
//! <root>/.locks/<hash>.lock                      extraction in progress
//! <root>/.trash/                                 evicted, awaiting removal
//! ```
//!
//! Several `vsum` processes may share one root. Every mutation holds the
//! index lock and re-reads the root first, so entries, reservations and pins
//! of other processes are accounted for. After every completed mutation the
//! committed bytes stay within `max_bytes`; reservations count against the
//! ceiling too.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use vsum_media::{dir_size, list_frames};
use vsum_models::{ExtractionMode, ExtractionPlan};

use crate::error::{PipelineError, PipelineResult};
use crate::lockfile::{self, process_gone, LockFile, LockPolicy};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::metrics;

pub const MANIFEST_FILE: &str = "entry.json";
pub const FRAMES_DIR: &str = "frames";
pub const STAGING_DIR: &str = ".staging";
pub const PINS_DIR: &str = ".pins";
pub const LOCKS_DIR: &str = ".locks";
pub const TRASH_DIR: &str = ".trash";
const INDEX_LOCK: &str = ".lock";
const MANIFEST_VERSION: u32 = 1;

/// Reservations, pins and extraction locks older than this belong to a run
/// that died.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 3600);

const INDEX_LOCK_POLICY: LockPolicy = LockPolicy::new(Duration::from_secs(60), Some(Duration::from_secs(120)));
const CONTENT_LOCK_POLL: Duration = Duration::from_millis(200);

static NAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// `<base>-<pid>-<n>`, unique within this host.
fn unique_name(base: &str) -> String {
    format!("{}-{}-{}", base, std::process::id(), NAME_SEQ.fetch_add(1, Ordering::Relaxed))
}

fn safe_hash(hash: &str) -> String {
    hash.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect()
}

/// Identity of a cache entry: what was extracted and how.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub content_hash: String,
    pub mode: ExtractionMode,
}

impl CacheKey {
    pub fn new(content_hash: impl Into<String>, mode: ExtractionMode) -> Self {
        Self {
            content_hash: content_hash.into(),
            mode,
        }
    }

    pub fn for_plan(content_hash: impl Into<String>, plan: &ExtractionPlan) -> Self {
        Self::new(content_hash, plan.mode)
    }

    /// Directory name of the entry under the cache root.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", safe_hash(&self.content_hash), self.mode.tag())
    }
}

/// A committed set of frames.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub dir: PathBuf,
    pub plan: ExtractionPlan,
    /// Frame files in playback order
    pub frame_paths: Vec<PathBuf>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub source_name: String,
}

impl CacheEntry {
    pub fn frames_dir(&self) -> PathBuf {
        self.dir.join(FRAMES_DIR)
    }

    pub fn frame_count(&self) -> usize {
        self.frame_paths.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryManifest {
    version: u32,
    content_hash: String,
    plan: ExtractionPlan,
    frame_files: Vec<String>,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    source_name: String,
}

impl EntryManifest {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            version: MANIFEST_VERSION,
            content_hash: entry.key.content_hash.clone(),
            plan: entry.plan,
            frame_files: entry
                .frame_paths
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect(),
            size_bytes: entry.size_bytes,
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            source_name: entry.source_name.clone(),
        }
    }
}

/// Owner of a reservation or a pin, written next to what it claims.
#[derive(Debug, Serialize, Deserialize)]
struct OwnerMarker {
    pid: u32,
    created_at: DateTime<Utc>,
    #[serde(default)]
    bytes: u64,
    /// Entry directory name the marker refers to
    #[serde(default)]
    entry: Option<String>,
}

impl OwnerMarker {
    fn new(bytes: u64, entry: String) -> Self {
        Self {
            pid: std::process::id(),
            created_at: Utc::now(),
            bytes,
            entry: Some(entry),
        }
    }

    fn is_stale(&self, stale_after: Duration) -> bool {
        let expired = Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age > stale_after)
            .unwrap_or(false);
        expired || process_gone(self.pid)
    }
}

/// Cache totals.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub root: PathBuf,
    pub entry_count: usize,
    pub total_bytes: u64,
    pub reserved_bytes: u64,
    pub max_bytes: u64,
    pub pinned_entries: usize,
}

/// Outcome of a bulk eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionSummary {
    pub removed: usize,
    pub freed_bytes: u64,
    /// Entries left in place because a run is using them
    pub skipped: usize,
}

/// What the cache root holds right now, across all processes.
#[derive(Debug, Default)]
struct DiskView {
    entries: Vec<CacheEntry>,
    reserved_bytes: u64,
    pinned_dirs: HashSet<String>,
    locked_hashes: HashSet<String>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    total_bytes: u64,
    reserved_bytes: u64,
    /// Pins held through this manager
    pins: HashMap<CacheKey, usize>,
    /// Entry directories pinned by any process as of the last scan
    pinned_dirs: HashSet<String>,
    /// Hashes under extraction by any process as of the last scan
    locked_hashes: HashSet<String>,
}

impl CacheState {
    fn is_pinned(&self, key: &CacheKey) -> bool {
        self.pins.get(key).copied().unwrap_or(0) > 0 || self.pinned_dirs.contains(&key.dir_name())
    }

    fn detach(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.total_bytes += entry.size_bytes;
        if let Some(old) = self.entries.insert(entry.key.clone(), entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
    }

    fn apply(&mut self, view: DiskView) {
        self.entries.clear();
        self.total_bytes = 0;
        for entry in view.entries {
            self.insert(entry);
        }
        self.reserved_bytes = view.reserved_bytes;
        self.pinned_dirs = view.pinned_dirs;
        self.locked_hashes = view.locked_hashes;
    }
}

type SharedState = Arc<StdMutex<CacheState>>;

fn lock_state(state: &SharedState) -> StdMutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reserved cache budget for one extraction.
///
/// Dropping it without committing releases the reservation and removes the
/// staging directory.
#[derive(Debug)]
pub struct Admission {
    state: SharedState,
    key: CacheKey,
    reserved: u64,
    staging_dir: PathBuf,
    marker: PathBuf,
    committed: bool,
}

impl Admission {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Private directory the extraction writes into.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved
    }

    fn release(&mut self) {
        if self.reserved > 0 {
            let mut state = lock_state(&self.state);
            state.reserved_bytes = state.reserved_bytes.saturating_sub(self.reserved);
            self.reserved = 0;
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.release();
        if !self.committed {
            remove_now(&self.staging_dir);
        }
        remove_now(&self.marker);
    }
}

/// Marks an entry as in use; no process evicts a pinned entry.
#[derive(Debug)]
pub struct CachePin {
    state: SharedState,
    key: CacheKey,
    marker: Option<PathBuf>,
}

impl CachePin {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for CachePin {
    fn drop(&mut self) {
        {
            let mut state = lock_state(&self.state);
            if let Some(count) = state.pins.get_mut(&self.key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.pins.remove(&self.key);
                }
            }
        }
        if let Some(marker) = &self.marker {
            remove_now(marker);
        }
    }
}

/// Exclusive right to extract one content hash, shared with other processes
/// through a lock file.
#[derive(Debug)]
pub struct ContentLock {
    _file: LockFile,
    _guard: KeyGuard<String>,
}

/// Size-bounded store of extracted frame directories.
#[derive(Debug)]
pub struct CacheManager {
    root: PathBuf,
    max_bytes: u64,
    stale_after: Duration,
    state: SharedState,
    locks: KeyedLocks<String>,
}

impl CacheManager {
    fn unopened(root: PathBuf, max_bytes: u64, stale_after: Duration) -> Self {
        Self {
            root,
            max_bytes,
            stale_after,
            state: Arc::new(StdMutex::new(CacheState::default())),
            locks: KeyedLocks::new(),
        }
    }

    pub async fn open(root: impl AsRef<Path>, max_bytes: u64) -> PipelineResult<Self> {
        Self::open_with(root, max_bytes, DEFAULT_STALE_AFTER).await
    }

    /// Open the cache at `root` for use.
    ///
    /// Leftovers of dead runs are removed: staging directories and pins whose
    /// owner exited or is older than `stale_after`, entry directories without
    /// a valid manifest, and the trash. Entries beyond the ceiling are
    /// evicted.
    pub async fn open_with(root: impl AsRef<Path>, max_bytes: u64, stale_after: Duration) -> PipelineResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [STAGING_DIR, PINS_DIR, LOCKS_DIR, TRASH_DIR].map(|d| root.join(d)) {
            fs::create_dir_all(&dir).await.map_err(|e| {
                PipelineError::cache(format!("cannot create cache directory {}: {}", dir.display(), e))
            })?;
        }
        let manager = Self::unopened(root, max_bytes, stale_after);

        let index_lock = manager.lock_index().await?;
        manager.sweep().await?;
        manager.refresh().await?;

        // The ceiling may have been lowered since the last run
        let evicted: Vec<CacheEntry> = {
            let mut state = lock_state(&manager.state);
            let victims = manager.plan_eviction(&state, 0).unwrap_or_default();
            victims.iter().filter_map(|k| state.detach(k)).collect()
        };
        let trash = manager.retire(evicted, "ceiling").await;
        drop(index_lock);
        purge(trash).await;

        let stats = manager.stats();
        info!(
            root = %manager.root.display(),
            entries = stats.entry_count,
            total_bytes = stats.total_bytes,
            max_bytes = stats.max_bytes,
            "Cache opened"
        );
        Ok(manager)
    }

    /// Read the cache at `root` without changing anything on disk.
    pub async fn inspect(root: impl AsRef<Path>, max_bytes: u64, stale_after: Duration) -> PipelineResult<Self> {
        let manager = Self::unopened(root.as_ref().to_path_buf(), max_bytes, stale_after);
        manager.refresh().await?;
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        lock_state(&self.state).entries.contains_key(key)
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        lock_state(&self.state).entries.get(key).cloned()
    }

    /// All entries as of the last read of the root, most recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = lock_state(&self.state).entries.values().cloned().collect();
        entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        entries
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock_state(&self.state);
        CacheStats {
            root: self.root.clone(),
            entry_count: state.entries.len(),
            total_bytes: state.total_bytes,
            reserved_bytes: state.reserved_bytes,
            max_bytes: self.max_bytes,
            pinned_entries: state.entries.keys().filter(|k| state.is_pinned(k)).count(),
        }
    }

    /// Re-read entries, reservations, pins and extraction locks from disk.
    pub async fn refresh(&self) -> PipelineResult<()> {
        let view = self.scan().await?;
        lock_state(&self.state).apply(view);
        Ok(())
    }

    /// Wait for the right to extract `content_hash`.
    ///
    /// Held across processes; entries of a locked hash are never evicted.
    pub async fn lock_content(&self, content_hash: &str) -> PipelineResult<ContentLock> {
        let guard = self.locks.lock(content_hash.to_string()).await;
        let dir = self.root.join(LOCKS_DIR);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.lock", safe_hash(content_hash)));
        let policy = LockPolicy::new(self.stale_after, None).with_retry_interval(CONTENT_LOCK_POLL);
        let file = LockFile::acquire(&path, policy)
            .await
            .map_err(|e| PipelineError::cache(format!("cannot lock {}: {}", path.display(), e)))?;
        Ok(ContentLock {
            _file: file,
            _guard: guard,
        })
    }

    /// Pin an entry known to this manager.
    pub fn pin(&self, key: &CacheKey) -> Option<CachePin> {
        {
            let mut state = lock_state(&self.state);
            if !state.entries.contains_key(key) {
                return None;
            }
            *state.pins.entry(key.clone()).or_insert(0) += 1;
        }
        Some(self.pin_counted(key))
    }

    /// Pin handle for a key whose in-memory count was already raised.
    fn pin_counted(&self, key: &CacheKey) -> CachePin {
        let path = self
            .root
            .join(PINS_DIR)
            .join(format!("{}.json", unique_name(&key.dir_name())));
        let written = serde_json::to_vec(&OwnerMarker::new(0, key.dir_name()))
            .map_err(std::io::Error::from)
            .and_then(|bytes| std::fs::write(&path, bytes));
        let marker = match written {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(key = %key.dir_name(), error = %e, "Failed to write pin marker");
                None
            }
        };
        CachePin {
            state: Arc::clone(&self.state),
            key: key.clone(),
            marker,
        }
    }

    /// Update `last_accessed_at` of an entry and persist it.
    pub async fn touch(&self, key: &CacheKey) -> PipelineResult<Option<CacheEntry>> {
        let _index = self.lock_index().await?;
        self.refresh().await?;
        let entry = {
            let mut state = lock_state(&self.state);
            match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.last_accessed_at = Utc::now();
                    entry.clone()
                }
                None => return Ok(None),
            }
        };
        write_manifest(&entry).await?;
        Ok(Some(entry))
    }

    /// Touch and pin an entry for reuse, including entries committed by
    /// other processes since the last read.
    pub async fn checkout(&self, key: &CacheKey) -> PipelineResult<Option<(CacheEntry, CachePin)>> {
        let index_lock = self.lock_index().await?;
        self.refresh().await?;
        let entry = {
            let mut state = lock_state(&self.state);
            let Some(entry) = state.entries.get_mut(key) else {
                return Ok(None);
            };
            entry.last_accessed_at = Utc::now();
            let entry = entry.clone();
            *state.pins.entry(key.clone()).or_insert(0) += 1;
            entry
        };
        let pin = self.pin_counted(key);

        if fs::metadata(entry.frames_dir()).await.is_err() {
            warn!(dir = %entry.dir.display(), "Cached frames missing on disk, dropping entry");
            drop(pin);
            let removed = lock_state(&self.state).detach(key);
            let trash = self.retire(removed.into_iter().collect(), "missing").await;
            drop(index_lock);
            purge(trash).await;
            return Ok(None);
        }

        if let Err(e) = write_manifest(&entry).await {
            warn!(dir = %entry.dir.display(), error = %e, "Failed to persist access time");
        }
        Ok(Some((entry, pin)))
    }

    /// Reserve `estimated_bytes` for a new entry, evicting least recently
    /// used entries as needed.
    ///
    /// Estimates above the ceiling are clamped to it; the real size is
    /// checked again at commit.
    pub async fn reserve(&self, key: &CacheKey, estimated_bytes: u64) -> PipelineResult<Admission> {
        let estimated = estimated_bytes.min(self.max_bytes);
        let index_lock = self.lock_index().await?;
        self.refresh().await?;

        let evicted = {
            let mut state = lock_state(&self.state);
            let victims = self.plan_eviction(&state, estimated).ok_or_else(|| {
                PipelineError::cache(format!(
                    "cannot reserve {} bytes: {} of {} bytes in use by active runs",
                    estimated,
                    state.total_bytes + state.reserved_bytes,
                    self.max_bytes
                ))
            })?;
            let removed: Vec<CacheEntry> = victims.iter().filter_map(|k| state.detach(k)).collect();
            state.reserved_bytes += estimated;
            removed
        };

        let name = unique_name(&key.dir_name());
        let staging = self.root.join(STAGING_DIR);
        let admission = Admission {
            state: Arc::clone(&self.state),
            key: key.clone(),
            reserved: estimated,
            staging_dir: staging.join(&name),
            marker: staging.join(format!("{}.json", name)),
            committed: false,
        };

        fs::create_dir_all(admission.staging_dir())
            .await
            .map_err(|e| PipelineError::cache(format!("cannot create staging directory: {}", e)))?;
        write_marker(&admission.marker, &OwnerMarker::new(estimated, key.dir_name()))
            .await
            .map_err(|e| PipelineError::cache(format!("cannot record reservation: {}", e)))?;

        let trash = self.retire(evicted, "lru").await;
        drop(index_lock);
        purge(trash).await;

        debug!(key = %key.dir_name(), reserved = estimated, "Cache budget reserved");
        Ok(admission)
    }

    /// Move staged frames into a new entry.
    ///
    /// The reservation is swapped for the measured size, evicting further if
    /// the frames turned out larger than estimated. Fails, removing the
    /// staged files, when the entry cannot fit.
    pub async fn commit(
        &self,
        mut admission: Admission,
        plan: &ExtractionPlan,
        source_name: &str,
    ) -> PipelineResult<CacheEntry> {
        let staging = admission.staging_dir.clone();
        let frames = list_frames(&staging)
            .await
            .map_err(|e| PipelineError::cache(format!("cannot read staged frames: {}", e)))?;
        if frames.is_empty() {
            return Err(PipelineError::cache("no staged frames to commit"));
        }
        let actual = dir_size(&staging)
            .await
            .map_err(|e| PipelineError::cache(format!("cannot measure staged frames: {}", e)))?;

        let index_lock = self.lock_index().await?;
        self.refresh().await?;

        let evicted = {
            let mut state = lock_state(&self.state);
            state.reserved_bytes = state.reserved_bytes.saturating_sub(admission.reserved);
            admission.reserved = 0;

            let victims = self.plan_eviction(&state, actual).ok_or_else(|| {
                PipelineError::cache(format!(
                    "extracted frames need {} bytes but the cache ceiling is {} bytes",
                    actual, self.max_bytes
                ))
            })?;
            let removed: Vec<CacheEntry> = victims.iter().filter_map(|k| state.detach(k)).collect();
            state.reserved_bytes += actual;
            admission.reserved = actual;
            removed
        };
        let trash = self.retire(evicted, "lru").await;

        let key = admission.key.clone();
        let entry_dir = self.root.join(key.dir_name());
        let entry = match install(&staging, &entry_dir, &key, plan, &frames, actual, source_name).await {
            Ok(entry) => entry,
            Err(e) => {
                remove_path(&entry_dir).await;
                drop(index_lock);
                purge(trash).await;
                return Err(e);
            }
        };

        {
            let mut state = lock_state(&self.state);
            state.reserved_bytes = state.reserved_bytes.saturating_sub(admission.reserved);
            admission.reserved = 0;
            admission.committed = true;
            state.insert(entry.clone());
        }
        remove_path(&admission.marker).await;
        drop(index_lock);
        purge(trash).await;

        info!(
            key = %key.dir_name(),
            frames = entry.frame_count(),
            size_bytes = entry.size_bytes,
            "Cache entry committed"
        );
        Ok(entry)
    }

    /// Remove one entry. Returns false when absent or in use.
    pub async fn evict(&self, key: &CacheKey) -> PipelineResult<bool> {
        let index_lock = self.lock_index().await?;
        self.refresh().await?;
        let removed = {
            let mut state = lock_state(&self.state);
            if self.is_busy(&state, key) {
                debug!(key = %key.dir_name(), "Entry in use, not evicting");
                return Ok(false);
            }
            state.detach(key)
        };
        let Some(entry) = removed else {
            return Ok(false);
        };
        let trash = self.retire(vec![entry], "explicit").await;
        drop(index_lock);
        purge(trash).await;
        Ok(true)
    }

    /// Remove every entry not in use.
    pub async fn evict_all(&self) -> PipelineResult<EvictionSummary> {
        self.evict_where(|_| true, "clean").await
    }

    /// Remove entries created more than `retention` ago.
    pub async fn evict_older_than(&self, retention: Duration) -> PipelineResult<EvictionSummary> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.evict_created_before(cutoff).await,
            None => Ok(EvictionSummary::default()),
        }
    }

    pub async fn evict_created_before(&self, cutoff: DateTime<Utc>) -> PipelineResult<EvictionSummary> {
        self.evict_where(|entry| entry.created_at < cutoff, "expired").await
    }

    async fn evict_where<F>(&self, predicate: F, reason: &'static str) -> PipelineResult<EvictionSummary>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let index_lock = self.lock_index().await?;
        self.refresh().await?;

        let mut summary = EvictionSummary::default();
        let removed = {
            let mut state = lock_state(&self.state);
            let matching: Vec<CacheKey> = state
                .entries
                .values()
                .filter(|e| predicate(e))
                .map(|e| e.key.clone())
                .collect();
            let mut removed = Vec::new();
            for key in matching {
                if self.is_busy(&state, &key) {
                    summary.skipped += 1;
                    continue;
                }
                if let Some(entry) = state.detach(&key) {
                    removed.push(entry);
                }
            }
            removed
        };
        summary.removed = removed.len();
        summary.freed_bytes = removed.iter().map(|e| e.size_bytes).sum();
        let trash = self.retire(removed, reason).await;
        drop(index_lock);
        purge(trash).await;
        Ok(summary)
    }

    fn is_busy(&self, state: &CacheState, key: &CacheKey) -> bool {
        state.is_pinned(key)
            || self.locks.is_locked(&key.content_hash)
            || state.locked_hashes.contains(&safe_hash(&key.content_hash))
    }

    /// Victims that make room for `incoming` bytes, oldest access first.
    ///
    /// `None` when entries in use leave too little room.
    fn plan_eviction(&self, state: &CacheState, incoming: u64) -> Option<Vec<CacheKey>> {
        let mut projected = state.total_bytes + state.reserved_bytes + incoming;
        if projected <= self.max_bytes {
            return Some(Vec::new());
        }

        let mut candidates: Vec<&CacheEntry> = state
            .entries
            .values()
            .filter(|e| !self.is_busy(state, &e.key))
            .collect();
        candidates.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then(a.created_at.cmp(&b.created_at))
        });

        let mut victims = Vec::new();
        for entry in candidates {
            if projected <= self.max_bytes {
                break;
            }
            projected = projected.saturating_sub(entry.size_bytes);
            victims.push(entry.key.clone());
        }

        if projected <= self.max_bytes {
            Some(victims)
        } else {
            None
        }
    }

    async fn lock_index(&self) -> PipelineResult<LockFile> {
        LockFile::acquire(&self.root.join(INDEX_LOCK), INDEX_LOCK_POLICY)
            .await
            .map_err(|e| PipelineError::cache(format!("cannot lock cache index in {}: {}", self.root.display(), e)))
    }

    async fn scan(&self) -> PipelineResult<DiskView> {
        let mut view = DiskView::default();

        for dir in read_dir_paths(&self.root).await? {
            if is_hidden(&dir) || !is_dir(&dir).await {
                continue;
            }
            if let Some(entry) = load_entry(&dir).await {
                view.entries.push(entry);
            }
        }

        for path in read_dir_paths(&self.root.join(STAGING_DIR)).await? {
            if !is_json(&path) {
                continue;
            }
            if let Some(marker) = read_marker(&path).await {
                if !marker.is_stale(self.stale_after) {
                    view.reserved_bytes += marker.bytes;
                }
            }
        }

        for path in read_dir_paths(&self.root.join(PINS_DIR)).await? {
            if let Some(marker) = read_marker(&path).await {
                if !marker.is_stale(self.stale_after) {
                    view.pinned_dirs.extend(marker.entry);
                }
            }
        }

        for path in read_dir_paths(&self.root.join(LOCKS_DIR)).await? {
            if path.extension().is_some_and(|ext| ext == "lock") && lockfile::is_held(&path, self.stale_after).await {
                if let Some(stem) = path.file_stem() {
                    view.locked_hashes.insert(stem.to_string_lossy().into_owned());
                }
            }
        }

        Ok(view)
    }

    /// Remove what dead runs left behind. Caller holds the index lock.
    async fn sweep(&self) -> PipelineResult<()> {
        let staging = read_dir_paths(&self.root.join(STAGING_DIR)).await?;
        for marker_path in staging.iter().filter(|p| is_json(p)) {
            let stale = match read_marker(marker_path).await {
                Some(marker) => marker.is_stale(self.stale_after),
                None => true,
            };
            if stale {
                let dir = marker_path.with_extension("");
                debug!(dir = %dir.display(), "Removing abandoned staging directory");
                remove_path(&dir).await;
                remove_path(marker_path).await;
            }
        }
        // A staging directory is created together with its reservation
        for dir in staging.iter().filter(|p| !is_json(p)) {
            if fs::metadata(dir.with_extension("json")).await.is_err() {
                debug!(dir = %dir.display(), "Removing unclaimed staging directory");
                remove_path(dir).await;
            }
        }

        for marker_path in read_dir_paths(&self.root.join(PINS_DIR)).await? {
            let stale = match read_marker(&marker_path).await {
                Some(marker) => marker.is_stale(self.stale_after),
                None => true,
            };
            if stale {
                remove_path(&marker_path).await;
            }
        }

        purge(read_dir_paths(&self.root.join(TRASH_DIR)).await?).await;

        for dir in read_dir_paths(&self.root).await? {
            if is_hidden(&dir) || !is_dir(&dir).await {
                continue;
            }
            if load_entry(&dir).await.is_none() {
                warn!(dir = %dir.display(), "Removing cache directory without a valid manifest");
                remove_path(&dir).await;
            }
        }
        Ok(())
    }

    /// Move evicted entries into the trash. Caller holds the index lock;
    /// the returned paths are deleted after it is released.
    async fn retire(&self, entries: Vec<CacheEntry>, reason: &'static str) -> Vec<PathBuf> {
        if entries.is_empty() {
            return Vec::new();
        }
        let trash_root = self.root.join(TRASH_DIR);
        if let Err(e) = fs::create_dir_all(&trash_root).await {
            warn!(dir = %trash_root.display(), error = %e, "Failed to create trash directory");
        }

        let mut trash = Vec::new();
        for entry in entries {
            let target = trash_root.join(unique_name(&entry.key.dir_name()));
            match fs::rename(&entry.dir, &target).await {
                Ok(()) => trash.push(target),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(dir = %entry.dir.display(), error = %e, "Cannot move evicted entry, deleting in place");
                    remove_path(&entry.dir).await;
                }
            }
            metrics::record_eviction(reason, entry.size_bytes);
            info!(
                key = %entry.key.dir_name(),
                size_bytes = entry.size_bytes,
                reason = reason,
                "Cache entry evicted"
            );
        }
        trash
    }
}

async fn purge(paths: Vec<PathBuf>) {
    join_all(paths.iter().map(|path| remove_path(path))).await;
}

async fn remove_path(path: &Path) {
    let result = match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache path"),
    }
}

/// Blocking removal for `Drop` impls.
fn remove_now(path: &Path) {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove cache path");
        }
    }
}

async fn read_dir_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    Ok(paths)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn read_marker(path: &Path) -> Option<OwnerMarker> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn write_marker(path: &Path, marker: &OwnerMarker) -> std::io::Result<()> {
    fs::write(path, serde_json::to_vec(marker)?).await
}

async fn install(
    staging: &Path,
    entry_dir: &Path,
    key: &CacheKey,
    plan: &ExtractionPlan,
    frames: &[PathBuf],
    size_bytes: u64,
    source_name: &str,
) -> PipelineResult<CacheEntry> {
    match fs::remove_dir_all(entry_dir).await {
        Ok(()) => warn!(dir = %entry_dir.display(), "Replaced existing cache directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(entry_dir).await?;
    let frames_dir = entry_dir.join(FRAMES_DIR);
    fs::rename(staging, &frames_dir).await?;

    let now = Utc::now();
    let entry = CacheEntry {
        key: key.clone(),
        dir: entry_dir.to_path_buf(),
        plan: *plan,
        frame_paths: frames
            .iter()
            .filter_map(|p| p.file_name().map(|name| frames_dir.join(name)))
            .collect(),
        size_bytes,
        created_at: now,
        last_accessed_at: now,
        source_name: source_name.to_string(),
    };
    write_manifest(&entry).await?;
    Ok(entry)
}

async fn write_manifest(entry: &CacheEntry) -> PipelineResult<()> {
    let manifest = EntryManifest::from_entry(entry);
    let path = entry.dir.join(MANIFEST_FILE);
    let tmp = entry.dir.join(format!("{}.{}.tmp", MANIFEST_FILE, std::process::id()));
    fs::write(&tmp, serde_json::to_vec_pretty(&manifest)?).await?;
    fs::rename(&tmp, &path).await?;
    Ok(())
}

async fn load_entry(dir: &Path) -> Option<CacheEntry> {
    let bytes = fs::read(dir.join(MANIFEST_FILE)).await.ok()?;
    let manifest: EntryManifest = match serde_json::from_slice(&bytes) {
        Ok(m) => m,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Unreadable cache manifest");
            return None;
        }
    };
    if manifest.version != MANIFEST_VERSION || manifest.frame_files.is_empty() {
        return None;
    }

    let frames_dir = dir.join(FRAMES_DIR);
    let size_bytes = dir_size(&frames_dir).await.ok()?;
    if size_bytes == 0 {
        return None;
    }

    Some(CacheEntry {
        key: CacheKey::new(manifest.content_hash, manifest.plan.mode),
        dir: dir.to_path_buf(),
        plan: manifest.plan,
        frame_paths: manifest
            .frame_files
            .iter()
            .map(|name| frames_dir.join(name))
            .collect(),
        size_bytes,
        created_at: manifest.created_at,
        last_accessed_at: manifest.last_accessed_at,
        source_name: manifest.source_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(hash: &str) -> CacheKey {
        CacheKey::new(hash, ExtractionMode::FixedInterval { seconds: 5 })
    }

    fn plan() -> ExtractionPlan {
        ExtractionPlan::fixed_interval(5, 2)
    }

    async fn stage(admission: &Admission, frames: usize, bytes_each: usize) {
        for i in 1..=frames {
            let path = admission.staging_dir().join(format!("frame_{:04}.jpg", i));
            fs::write(path, vec![0u8; bytes_each]).await.unwrap();
        }
    }

    async fn insert(cache: &CacheManager, hash: &str, frames: usize, bytes_each: usize) -> CacheEntry {
        let k = key(hash);
        let admission = cache.reserve(&k, (frames * bytes_each) as u64).await.unwrap();
        stage(&admission, frames, bytes_each).await;
        cache.commit(admission, &plan(), hash).await.unwrap()
    }

    #[test]
    fn test_dir_name_is_filesystem_safe() {
        let k = CacheKey::new("a/b:c", ExtractionMode::AllKeyframes);
        assert_eq!(k.dir_name(), "a_b_c_kf");
        assert_eq!(key("abc").dir_name(), "abc_i5");
    }

    #[tokio::test]
    async fn test_commit_registers_entry_and_manifest() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 10_000).await.unwrap();

        let entry = insert(&cache, "hash1", 3, 100).await;
        assert_eq!(entry.frame_count(), 3);
        assert_eq!(entry.size_bytes, 300);
        assert!(entry.frame_paths.iter().all(|p| p.exists()));
        assert!(entry.dir.join(MANIFEST_FILE).exists());

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 300);
        assert_eq!(stats.reserved_bytes, 0);

        // No staging leftovers
        let staging: Vec<_> = std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().collect();
        assert!(staging.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index_and_removes_orphans() {
        let dir = TempDir::new().unwrap();
        {
            let cache = CacheManager::open(dir.path(), 10_000).await.unwrap();
            insert(&cache, "hash1", 2, 100).await;
            // Leaked admission from an interrupted run
            let admission = cache.reserve(&key("hash2"), 100).await.unwrap();
            stage(&admission, 1, 100).await;
            std::mem::forget(admission);
        }
        std::fs::create_dir_all(dir.path().join("orphan_i5/frames")).unwrap();
        std::fs::create_dir_all(dir.path().join(STAGING_DIR).join("unclaimed")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cache = CacheManager::open_with(dir.path(), 10_000, Duration::ZERO).await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 200);
        assert_eq!(stats.reserved_bytes, 0);
        assert!(cache.contains(&key("hash1")));
        assert!(!dir.path().join("orphan_i5").exists());
        assert_eq!(std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_second_open_keeps_in_flight_staging() {
        let dir = TempDir::new().unwrap();
        let first = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let admission = first.reserve(&key("busy"), 300).await.unwrap();
        stage(&admission, 3, 100).await;
        let staging = admission.staging_dir().to_path_buf();

        let second = CacheManager::open(dir.path(), 10_000).await.unwrap();
        assert!(staging.exists());
        assert_eq!(second.stats().reserved_bytes, 300);

        let entry = first.commit(admission, &plan(), "busy").await.unwrap();
        assert_eq!(entry.frame_count(), 3);
        second.refresh().await.unwrap();
        assert!(second.contains(&key("busy")));
        assert_eq!(second.stats().reserved_bytes, 0);
    }

    #[tokio::test]
    async fn test_managers_sharing_a_root_respect_the_ceiling() {
        let dir = TempDir::new().unwrap();
        let first = CacheManager::open(dir.path(), 1000).await.unwrap();
        let second = CacheManager::open(dir.path(), 1000).await.unwrap();

        let a = first.reserve(&key("a"), 800).await.unwrap();
        stage(&a, 8, 100).await;
        // The other manager sees the outstanding reservation
        assert!(second.reserve(&key("b"), 800).await.is_err());
        first.commit(a, &plan(), "a").await.unwrap();

        let b = second.reserve(&key("b"), 800).await.unwrap();
        stage(&b, 8, 100).await;
        second.commit(b, &plan(), "b").await.unwrap();

        let view = CacheManager::inspect(dir.path(), 1000, DEFAULT_STALE_AFTER).await.unwrap();
        let mut on_disk = 0;
        for entry in view.entries() {
            on_disk += dir_size(&entry.frames_dir()).await.unwrap();
        }
        assert_eq!(on_disk, 800);
        assert!(view.contains(&key("b")));
        assert!(!view.contains(&key("a")));

        first.refresh().await.unwrap();
        assert!(!first.contains(&key("a")));
    }

    #[tokio::test]
    async fn test_pin_of_another_manager_blocks_eviction() {
        let dir = TempDir::new().unwrap();
        let first = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let a = insert(&first, "a", 2, 100).await;
        let pin = first.pin(&a.key).unwrap();

        let second = CacheManager::open(dir.path(), 10_000).await.unwrap();
        assert!(!second.evict(&a.key).await.unwrap());
        assert_eq!(second.evict_all().await.unwrap().skipped, 1);
        assert_eq!(second.stats().pinned_entries, 1);

        drop(pin);
        assert!(second.evict(&a.key).await.unwrap());
        assert!(!a.dir.exists());
    }

    #[tokio::test]
    async fn test_content_lock_of_another_manager_blocks_eviction() {
        let dir = TempDir::new().unwrap();
        let first = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let a = insert(&first, "a", 2, 100).await;
        let lock = first.lock_content("a").await.unwrap();

        let second = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let summary = second.evict_all().await.unwrap();
        assert_eq!((summary.removed, summary.skipped), (0, 1));
        assert!(a.dir.exists());

        drop(lock);
        assert_eq!(second.evict_all().await.unwrap().removed, 1);
    }

    #[tokio::test]
    async fn test_content_lock_waits_across_managers() {
        let dir = TempDir::new().unwrap();
        let first = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let second = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let held = first.lock_content("same").await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(300), second.lock_content("same")).await;
        assert!(waiting.is_err());

        drop(held);
        let acquired = tokio::time::timeout(Duration::from_secs(2), second.lock_content("same")).await;
        assert!(acquired.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_inspect_leaves_the_root_untouched() {
        let dir = TempDir::new().unwrap();
        {
            let cache = CacheManager::open(dir.path(), 10_000).await.unwrap();
            insert(&cache, "kept", 2, 100).await;
        }
        std::fs::create_dir_all(dir.path().join("orphan_i5/frames")).unwrap();
        let leftover = dir.path().join(STAGING_DIR).join("leftover");
        std::fs::create_dir_all(&leftover).unwrap();

        let view = CacheManager::inspect(dir.path(), 10, DEFAULT_STALE_AFTER).await.unwrap();
        let stats = view.stats();
        assert_eq!((stats.entry_count, stats.total_bytes), (1, 200));
        assert!(dir.path().join("orphan_i5").exists());
        assert!(leftover.exists());
        assert!(view.contains(&key("kept")));
    }

    #[tokio::test]
    async fn test_inspect_of_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("never-created");
        let view = CacheManager::inspect(&root, 10_000, DEFAULT_STALE_AFTER).await.unwrap();
        assert_eq!(view.stats().entry_count, 0);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_reserve_evicts_least_recently_used() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 1000).await.unwrap();

        let a = insert(&cache, "a", 4, 100).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = insert(&cache, "b", 4, 100).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.touch(&a.key).await.unwrap();

        let c = insert(&cache, "c", 4, 100).await;
        assert!(cache.contains(&a.key));
        assert!(!cache.contains(&b.key));
        assert!(!b.dir.exists());
        assert!(cache.contains(&c.key));
        assert!(cache.stats().total_bytes <= 1000);
    }

    #[tokio::test]
    async fn test_pinned_entries_are_not_evicted() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 500).await.unwrap();

        let a = insert(&cache, "a", 4, 100).await;
        let pin = cache.pin(&a.key).unwrap();

        let err = cache.reserve(&key("b"), 400).await.unwrap_err();
        assert_eq!(err.kind(), "cache");
        assert!(!cache.evict(&a.key).await.unwrap());

        drop(pin);
        let admission = cache.reserve(&key("b"), 400).await.unwrap();
        assert!(!cache.contains(&a.key));
        drop(admission);
    }

    #[tokio::test]
    async fn test_locked_hash_is_not_evicted() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 500).await.unwrap();
        let a = insert(&cache, "a", 4, 100).await;

        let _lock = cache.lock_content("a").await.unwrap();
        assert!(cache.reserve(&key("b"), 400).await.is_err());
        let summary = cache.evict_all().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(cache.contains(&a.key));
    }

    #[tokio::test]
    async fn test_dropped_admission_releases_budget() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 1000).await.unwrap();

        let admission = cache.reserve(&key("a"), 800).await.unwrap();
        let staging = admission.staging_dir().to_path_buf();
        stage(&admission, 1, 10).await;
        assert_eq!(cache.stats().reserved_bytes, 800);
        assert!(cache.reserve(&key("b"), 800).await.is_err());

        drop(admission);
        assert_eq!(cache.stats().reserved_bytes, 0);
        assert!(!staging.exists());
        assert!(cache.reserve(&key("b"), 800).await.is_ok());
    }

    #[tokio::test]
    async fn test_commit_rejects_oversized_frames() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 500).await.unwrap();

        let admission = cache.reserve(&key("big"), 100).await.unwrap();
        let staging = admission.staging_dir().to_path_buf();
        stage(&admission, 6, 100).await;

        let err = cache.commit(admission, &plan(), "big").await.unwrap_err();
        assert_eq!(err.kind(), "cache");
        assert!(!cache.contains(&key("big")));
        assert!(!staging.exists());
        let stats = cache.stats();
        assert_eq!((stats.total_bytes, stats.reserved_bytes), (0, 0));
    }

    #[tokio::test]
    async fn test_commit_without_frames_fails() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 500).await.unwrap();
        let admission = cache.reserve(&key("empty"), 100).await.unwrap();
        assert!(cache.commit(admission, &plan(), "empty").await.is_err());
        assert_eq!(cache.stats().reserved_bytes, 0);
    }

    #[tokio::test]
    async fn test_evict_older_than_uses_created_at() {
        let dir = TempDir::new().unwrap();
        {
            let cache = CacheManager::open(dir.path(), 10_000).await.unwrap();
            let old = insert(&cache, "old", 2, 100).await;
            insert(&cache, "new", 2, 100).await;

            let manifest_path = old.dir.join(MANIFEST_FILE);
            let mut manifest: EntryManifest =
                serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
            manifest.created_at = Utc::now() - chrono::Duration::days(10);
            std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();
        }

        let cache = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let summary = cache
            .evict_older_than(Duration::from_secs(7 * 86400))
            .await
            .unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.freed_bytes, 200);
        assert!(!cache.contains(&key("old")));
        assert!(cache.contains(&key("new")));
        assert_eq!(cache.stats().total_bytes, 200);
    }

    #[tokio::test]
    async fn test_checkout_drops_entry_missing_on_disk() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::open(dir.path(), 10_000).await.unwrap();
        let entry = insert(&cache, "gone", 2, 100).await;

        let (_, pin) = cache.checkout(&entry.key).await.unwrap().unwrap();
        assert_eq!(cache.stats().pinned_entries, 1);
        drop(pin);

        std::fs::remove_dir_all(&entry.dir).unwrap();
        assert!(cache.checkout(&entry.key).await.unwrap().is_none());
        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(cache.stats().total_bytes, 0);
    }

    #[tokio::test]
    async fn test_total_never_exceeds_ceiling() {
        let dir = TempDir::new().unwrap();
        let max = 2_000u64;
        let cache = CacheManager::open(dir.path(), max).await.unwrap();

        let mut seed = 7u64;
        for i in 0..40 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let frames = 1 + (seed >> 33) as usize % 5;
            let hash = format!("v{}", seed % 9);
            match i % 4 {
                0 | 1 => {
                    let k = key(&hash);
                    if !cache.contains(&k) {
                        let admission = cache.reserve(&k, (frames * 100) as u64).await.unwrap();
                        stage(&admission, frames, 100).await;
                        cache.commit(admission, &plan(), &hash).await.unwrap();
                    }
                }
                2 => {
                    cache.touch(&key(&hash)).await.unwrap();
                }
                _ => {
                    cache.evict(&key(&hash)).await.unwrap();
                }
            }
            let stats = cache.stats();
            let sum: u64 = cache.entries().iter().map(|e| e.size_bytes).sum();
            assert_eq!(sum, stats.total_bytes);
            assert!(stats.total_bytes <= max, "step {}: {}", i, stats.total_bytes);
        }
    }
}
