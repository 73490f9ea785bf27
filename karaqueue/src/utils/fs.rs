//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors and keep the
//! staging-then-rename dance used by the publisher in one place.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure a directory exists (synchronous variant, used at startup).
pub fn ensure_dir_all_sync(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error("creating directory", path, e))
}

/// Hidden sibling of `path` used while a file is being written.
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

/// Atomically move a fully written staging file into place.
pub async fn commit_staged(staging: &Path, target: &Path) -> Result<()> {
    tokio::fs::rename(staging, target)
        .await
        .map_err(|e| io_error("renaming", staging, e))
}

/// Copy `src` to `target` through a staging name. Readers of `target` only
/// ever see a complete file.
pub async fn copy_atomic(src: &Path, target: &Path) -> Result<u64> {
    let staging = staging_path(target);
    let bytes = tokio::fs::copy(src, &staging)
        .await
        .map_err(|e| io_error("copying", src, e))?;
    commit_staged(&staging, target).await?;
    Ok(bytes)
}

/// Write `contents` to `target` through a staging name.
pub async fn write_atomic(target: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let staging = staging_path(target);
    tokio::fs::write(&staging, contents)
        .await
        .map_err(|e| io_error("writing", &staging, e))?;
    commit_staged(&staging, target).await
}

/// Remove a directory tree, treating "already gone" as success.
pub async fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Directory already removed");
            Ok(false)
        }
        Err(e) => Err(io_error("removing directory", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("/srv/7/video.mp4")),
            PathBuf::from("/srv/7/.video.mp4.partial")
        );
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index.html");
        write_atomic(&target, "<html></html>").await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "<html></html>");
        assert!(!staging_path(&target).exists());
    }

    #[tokio::test]
    async fn test_remove_dir_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("3");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("video.mp4"), b"x").unwrap();

        assert!(remove_dir_if_exists(&sub).await.unwrap());
        assert!(!sub.exists());
        assert!(!remove_dir_if_exists(&sub).await.unwrap());
    }
}
