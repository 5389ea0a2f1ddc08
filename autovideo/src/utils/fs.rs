//! Filesystem helpers with operation + path error context.

use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Ensure a directory exists (synchronous variant).
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

/// Move `from` to `to`, falling back to copy + delete across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        ensure_dir_all_with_op("creating output directory", parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_err,
                "rename failed, copying instead"
            );
            tokio::fs::copy(from, to)
                .await
                .map_err(|e| Error::io_path("copying", from, e))?;
            remove_file_best_effort(from).await;
            Ok(())
        }
    }
}

/// Remove a file, logging instead of failing.
pub async fn remove_file_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}
