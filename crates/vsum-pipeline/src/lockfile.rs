//! Exclusive lock files shared between `vsum` processes.
//!
//! A lock is a file created with `create_new` holding the owner's PID. It is
//! removed when the [`LockFile`] is dropped. A lock left behind by a crashed
//! process is broken once it is older than the policy's `stale_after`, or
//! sooner when its owner is known to have exited.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// How long to wait for a lock and when to consider it abandoned.
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    pub retry_interval: Duration,
    pub stale_after: Duration,
    /// `None` waits until the lock is free or stale
    pub timeout: Option<Duration>,
}

impl LockPolicy {
    pub const fn new(stale_after: Duration, timeout: Option<Duration>) -> Self {
        Self {
            retry_interval: Duration::from_millis(50),
            stale_after,
            timeout,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// A held lock file, removed on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Create `path` exclusively, waiting while another owner holds it.
    ///
    /// Fails with [`std::io::ErrorKind::TimedOut`] when the policy timeout
    /// elapses first.
    pub async fn acquire(path: &Path, policy: LockPolicy) -> std::io::Result<Self> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path).await {
                Ok(mut file) => {
                    file.write_all(std::process::id().to_string().as_bytes()).await?;
                    debug!(path = %path.display(), "Lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(path, policy.stale_after).await {
                        warn!(path = %path.display(), "Breaking stale lock");
                        let _ = fs::remove_file(path).await;
                        continue;
                    }
                    if let Some(timeout) = policy.timeout {
                        if started.elapsed() >= timeout {
                            return Err(std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                format!("timed out after {:?} waiting for {}", timeout, path.display()),
                            ));
                        }
                    }
                    tokio::time::sleep(policy.retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

/// Whether the lock at `path` is held by a live owner within `stale_after`.
pub async fn is_held(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path).await.is_ok() && !lock_is_stale(path, stale_after).await
}

async fn lock_is_stale(path: &Path, stale_after: Duration) -> bool {
    let age = fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok());
    if age.map(|age| age > stale_after).unwrap_or(false) {
        return true;
    }
    // An empty file is a lock being written right now
    match fs::read_to_string(path).await {
        Ok(content) => content.trim().parse::<u32>().map(process_gone).unwrap_or(false),
        Err(_) => false,
    }
}

/// True when `pid` is known not to be running on this host.
///
/// Only answers where `/proc` is available; elsewhere owners are judged by
/// age alone.
pub fn process_gone(pid: u32) -> bool {
    if pid == std::process::id() {
        return false;
    }
    let proc_root = Path::new("/proc");
    proc_root.join("self").exists() && !proc_root.join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const QUICK: LockPolicy = LockPolicy::new(Duration::from_secs(30), Some(Duration::from_millis(150)));

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.lock");

        let lock = LockFile::acquire(&path, QUICK).await.unwrap();
        assert!(is_held(&path, Duration::from_secs(30)).await);
        let err = LockFile::acquire(&path, QUICK).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);

        drop(lock);
        assert!(!path.exists());
        assert!(LockFile::acquire(&path, QUICK).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.lock");
        let lock = LockFile::acquire(&path, QUICK).await.unwrap();

        let waiter_path = path.clone();
        let waiter = tokio::spawn(async move {
            LockFile::acquire(&waiter_path, LockPolicy::new(Duration::from_secs(30), None))
                .await
                .map(|_| ())
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(lock);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.lock");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        let policy = LockPolicy::new(Duration::ZERO, Some(Duration::from_millis(150)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!is_held(&path, Duration::ZERO).await);
        assert!(LockFile::acquire(&path, policy).await.is_ok());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_lock_of_exited_process_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.lock");
        // Larger than the default pid_max, so never a live process
        std::fs::write(&path, "4194305").unwrap();

        assert!(!is_held(&path, Duration::from_secs(3600)).await);
        assert!(LockFile::acquire(&path, QUICK).await.is_ok());
    }
}
