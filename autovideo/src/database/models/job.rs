//! Job database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};
use crate::{Error, Result};

/// Job database model.
/// One end-to-end video request from submission to artifact or failure.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    /// Opaque 32-hex-char token, immutable.
    pub id: String,
    /// Requesting user.
    pub owner_id: i64,
    /// Where progress and results are delivered.
    pub channel_id: i64,
    /// Free-text topic, immutable.
    pub prompt: String,
    /// Target duration in seconds, already clamped.
    pub target_duration: i64,
    /// Status: queued, processing, done, failed
    pub status: String,
    /// Final video path, set only on `done`.
    pub artifact_location: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds, refreshed on every status transition.
    pub updated_at: i64,
}

impl JobDbModel {
    pub fn new(owner_id: i64, channel_id: i64, prompt: impl Into<String>, target_duration: u32) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            owner_id,
            channel_id,
            prompt: prompt.into(),
            target_duration: i64::from(target_duration),
            status: JobStatus::Queued.as_str().to_string(),
            artifact_location: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Typed status of this row.
    pub fn job_status(&self) -> Result<JobStatus> {
        self.status
            .parse()
            .map_err(|_| Error::Database(format!("unknown job status '{}'", self.status)))
    }

    /// Target duration in seconds.
    pub fn target_duration_secs(&self) -> u32 {
        u32::try_from(self.target_duration).unwrap_or(0)
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        ms_to_datetime(self.created_at)
    }

    pub fn updated_at_utc(&self) -> DateTime<Utc> {
        ms_to_datetime(self.updated_at)
    }
}

/// Job status values.
///
/// `queued -> processing -> {done, failed}`; `done` and `failed` are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by the gateway, waiting for a worker.
    Queued,
    /// Owned by an orchestrator, stages running.
    Processing,
    /// Artifact produced.
    Done,
    /// A stage failed beyond its fallback, or the job was aborted.
    Failed,
}

impl JobStatus {
    /// Column value, as stored in `job.status`.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Statuses from which a job may move into `self`.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            Self::Queued => &[],
            Self::Processing => &[Self::Queued],
            Self::Done | Self::Failed => &[Self::Processing],
        }
    }
}
