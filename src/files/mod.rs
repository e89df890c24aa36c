//! Filesystem primitives for upload staging and diagnostic capture.

use std::io::ErrorKind;
use std::path::Path;

use crate::error::{Error, Result};

/// Removes `dir` with everything in it and recreates it empty.
pub async fn recreate_empty(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io(dir, e))
}

/// Copies `src` to `dest`, creating the destination's parent directories.
pub async fn copy(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    tokio::fs::copy(src, dest)
        .await
        .map_err(|e| Error::io(src, e))?;
    Ok(())
}

/// Blocking variant of [`copy`] for synchronous hooks.
pub fn copy_blocking(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::copy(src, dest).map_err(|e| Error::io(src, e))?;
    Ok(())
}

pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
