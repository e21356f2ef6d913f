//! Filesystem helpers for frame and download directories.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

use crate::error::MediaResult;

/// Total size in bytes of all regular files under `dir`, recursively.
pub async fn dir_size(dir: impl AsRef<Path>) -> MediaResult<u64> {
    let mut total = 0u64;
    let mut pending = vec![dir.as_ref().to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

/// Frame images (`frame_*.jpg`) in `dir`, sorted by name.
pub async fn list_frames(dir: impl AsRef<Path>) -> MediaResult<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = match fs::read_dir(dir.as_ref()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(frames),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("frame_") && name.ends_with(".jpg") {
            frames.push(entry.path());
        }
    }
    frames.sort();
    Ok(frames)
}

/// Set the modification time of `path` to now.
pub async fn touch(path: impl AsRef<Path>) -> MediaResult<()> {
    let file = fs::OpenOptions::new().write(true).open(path.as_ref()).await?;
    file.into_std().await.set_modified(SystemTime::now())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dir_size_recurses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.bin"), vec![0u8; 100]).await.unwrap();
        fs::create_dir(dir.path().join("sub")).await.unwrap();
        fs::write(dir.path().join("sub/b.bin"), vec![0u8; 50]).await.unwrap();
        assert_eq!(dir_size(dir.path()).await.unwrap(), 150);
        assert_eq!(dir_size(dir.path().join("missing")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_frames_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["frame_0002.jpg", "frame_0001.jpg", "notes.txt", "frame_0003.png"] {
            fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        let frames = list_frames(dir.path()).await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_0001.jpg", "frame_0002.jpg"]);
    }

    #[tokio::test]
    async fn test_touch_refreshes_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("video.mp4");
        fs::write(&path, b"video").await.unwrap();
        let old = SystemTime::now() - std::time::Duration::from_secs(3 * 86400);
        std::fs::File::options().write(true).open(&path).unwrap().set_modified(old).unwrap();

        touch(&path).await.unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified > old + std::time::Duration::from_secs(86400));
        assert_eq!(fs::read(&path).await.unwrap(), b"video");
    }
}
