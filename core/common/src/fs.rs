//! Atomic file replacement for small persisted documents.
//!
//! Writers never edit a file in place: the new content goes to a uniquely
//! named sibling, is flushed to disk, and is then renamed over the target.
//! A reader therefore sees either the old document or the new one.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result};

/// Access mode applied to a file written by [`write_atomic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Platform default permissions.
    Default,
    /// Readable and writable by the owning user only (Unix `0600`).
    OwnerOnly,
}

/// Atomically replace `path` with `contents`.
///
/// # Postconditions
/// - On success, `path` holds exactly `contents`
/// - On failure, `path` is unchanged and no temporary file is left behind
///
/// # Errors
/// - Parent directory cannot be created
/// - Temporary file cannot be written or renamed
pub async fn write_atomic(path: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("No parent directory: {}", path.display())))?;
    fs::create_dir_all(parent).await?;

    let tmp_path = temp_sibling(path);
    let result = write_then_rename(&tmp_path, path, contents, mode).await;
    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path).await {
            debug!(path = %tmp_path.display(), "Temporary file not removed: {}", e);
        }
    }
    result
}

async fn write_then_rename(
    tmp_path: &Path,
    path: &Path,
    contents: &[u8],
    mode: FileMode,
) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    if mode == FileMode::OwnerOnly {
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(tmp_path, path).await?;
    Ok(())
}

/// Temporary path next to `path`, so the final rename stays on one filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Remove a file, treating "already absent" as success.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}
