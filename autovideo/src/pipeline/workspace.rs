//! Per-job scratch directory.
//!
//! Intermediates live in a `TempDir` under the work directory and are removed
//! when the job reaches a terminal state (or when the workspace is dropped
//! during a panic unwind). Only the final video is moved out, to
//! `<output_dir>/<job_id>.mp4`.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::utils::fs;
use crate::{Error, Result};

pub struct JobWorkspace {
    job_id: String,
    dir: TempDir,
    output_dir: PathBuf,
}

impl JobWorkspace {
    pub fn create(work_dir: &Path, output_dir: &Path, job_id: &str) -> Result<Self> {
        fs::ensure_dir_all_sync_with_op("creating work directory", work_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{job_id}-"))
            .tempdir_in(work_dir)
            .map_err(|e| Error::io_path("creating job workspace", work_dir, e))?;

        debug!(job_id, path = %dir.path().display(), "Job workspace created");
        Ok(Self {
            job_id: job_id.to_string(),
            dir,
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the assembler writes before the file is published.
    pub fn mux_output(&self) -> PathBuf {
        self.dir.path().join("video.mp4")
    }

    /// Final location of the job's video.
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", self.job_id))
    }

    /// Move the muxed video out of the workspace to its artifact location.
    pub async fn publish(&self, muxed: &Path) -> Result<PathBuf> {
        let artifact = self.artifact_path();
        fs::move_file(muxed, &artifact).await?;
        Ok(artifact)
    }

    /// Remove the workspace and everything left in it.
    pub async fn cleanup(self) {
        let job_id = self.job_id;
        let dir = self.dir;
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => debug!(job_id = %job_id, "Job workspace removed"),
            Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "Failed to remove job workspace"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Workspace cleanup task failed"),
        }
    }
}
