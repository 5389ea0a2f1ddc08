//! Job Orchestrator: drives one job through the stages and owns its status
//! transitions.
//!
//! `queued -> processing` is an exclusive claim at pickup; a run that loses
//! the claim leaves the job alone. A claimed job ends `done`
//! with an artifact location, or `failed` with exactly one generic failure
//! notification. Progress notifications are best-effort.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::StageKind;
use super::capabilities::Capabilities;
use super::stages::desired_visual_count;
use super::workspace::JobWorkspace;
use crate::database::models::{JobDbModel, JobStatus};
use crate::database::repositories::JobRepository;
use crate::notification::Transport;
use crate::utils::fs;
use crate::{Error, Result};

const MSG_VISUALS: &str = "🖼️ Generating frames (this may take a while)...";
const MSG_NARRATION: &str = "🔊 Generating narration...";
const MSG_ASSEMBLY: &str = "🎬 Assembling the video...";
const MSG_DONE: &str = "✅ Done! Here is your video.";
const MSG_FAILED: &str = "❌ Something went wrong while creating your video. Please try again later.";

/// Terminal result of one orchestrator run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done {
        artifact: PathBuf,
        /// Set when the video exists but could not be sent to the user.
        delivery_warning: Option<String>,
    },
    Failed {
        /// Stage whose fallback was also defeated, `None` for non-stage errors.
        stage: Option<StageKind>,
        reason: String,
    },
    /// The job was not `queued` at pickup and was left untouched.
    Skipped { status: JobStatus },
}

/// What the worker pool runs. Implemented by [`JobOrchestrator`].
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run `job_id` to a terminal state.
    ///
    /// `Err` means the job could not be brought to a terminal state; the pool
    /// then calls [`JobRunner::mark_crashed`].
    async fn run_job(&self, job_id: &str, cancel: CancellationToken) -> Result<JobOutcome>;

    /// Fail a job whose run panicked, timed out or errored. No-op for
    /// jobs already terminal.
    async fn mark_crashed(&self, job_id: &str, reason: &str);
}

pub struct JobOrchestrator {
    jobs: Arc<dyn JobRepository>,
    transport: Arc<dyn Transport>,
    stages: Arc<Capabilities>,
    work_dir: PathBuf,
    output_dir: PathBuf,
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        transport: Arc<dyn Transport>,
        stages: Arc<Capabilities>,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            transport,
            stages,
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    async fn notify(&self, job: &JobDbModel, text: &str) {
        if let Err(e) = self.transport.notify(job.channel_id, text).await {
            warn!(job_id = %job.id, error = %e, "Progress notification failed");
        }
    }

    pub async fn run(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobOutcome> {
        let job = self.jobs.get_job(job_id).await?;
        let status = job.job_status()?;
        if status != JobStatus::Queued {
            warn!(job_id, %status, "Job is not queued, skipping");
            return Ok(JobOutcome::Skipped { status });
        }

        if !self.jobs.claim_job(job_id).await? {
            let status = self.jobs.get_job(job_id).await?.job_status()?;
            warn!(job_id, %status, "Job claimed by another run, skipping");
            return Ok(JobOutcome::Skipped { status });
        }
        info!(
            job_id,
            owner_id = job.owner_id,
            target_duration = job.target_duration,
            "Job processing"
        );
        self.notify(
            &job,
            &format!("🔧 Processing: {}\nGenerating the script...", job.prompt),
        )
        .await;

        let workspace = match JobWorkspace::create(&self.work_dir, &self.output_dir, job_id) {
            Ok(workspace) => workspace,
            Err(e) => return self.fail(&job, e).await,
        };

        let result = self.execute(&job, &workspace, cancel).await;
        let outcome = match result {
            Ok(artifact) => self.complete(&job, artifact).await,
            Err(e) => self.fail(&job, e).await,
        };

        workspace.cleanup().await;
        outcome
    }

    /// Stages in order, checking for cancellation between them.
    async fn execute(
        &self,
        job: &JobDbModel,
        workspace: &JobWorkspace,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let duration = job.target_duration_secs();

        checkpoint(cancel)?;
        let script = self.stages.script.run(&job.id, &job.prompt, duration).await;

        checkpoint(cancel)?;
        self.notify(job, MSG_VISUALS).await;
        let visuals = self
            .stages
            .visuals
            .run(
                &job.id,
                &job.prompt,
                &script,
                desired_visual_count(duration),
                workspace.path(),
            )
            .await?;

        checkpoint(cancel)?;
        self.notify(job, MSG_NARRATION).await;
        let audio = self
            .stages
            .narration
            .run(&job.id, &script, workspace.path())
            .await?;

        checkpoint(cancel)?;
        self.notify(job, MSG_ASSEMBLY).await;
        let muxed = self
            .stages
            .assembly
            .run(&job.id, &visuals, &audio, &workspace.mux_output())
            .await?;

        workspace
            .publish(&muxed)
            .await
            .map_err(|e| Error::stage(StageKind::Assembly, e))
    }

    async fn complete(&self, job: &JobDbModel, artifact: PathBuf) -> Result<JobOutcome> {
        let location = artifact.to_string_lossy();
        if let Err(e) = self
            .jobs
            .update_job_status(&job.id, JobStatus::Done, Some(&location))
            .await
        {
            // No job row points at the artifact.
            fs::remove_file_best_effort(&artifact).await;
            return Err(e);
        }
        info!(job_id = %job.id, artifact = %location, "Job done");

        let delivery_warning = match self.transport.deliver_video(job.channel_id, &artifact).await
        {
            Ok(()) => {
                self.notify(job, MSG_DONE).await;
                None
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Video delivery failed");
                self.notify(
                    job,
                    &format!(
                        "⚠️ Your video is ready but could not be sent. Job ID: {}",
                        job.id
                    ),
                )
                .await;
                Some(e.to_string())
            }
        };

        Ok(JobOutcome::Done {
            artifact,
            delivery_warning,
        })
    }

    async fn fail(&self, job: &JobDbModel, err: Error) -> Result<JobOutcome> {
        let stage = err.failed_stage();
        error!(
            job_id = %job.id,
            stage = stage.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
            error = %err,
            "Job failed"
        );

        self.jobs
            .update_job_status(&job.id, JobStatus::Failed, None)
            .await?;
        self.notify(job, MSG_FAILED).await;

        Ok(JobOutcome::Failed {
            stage,
            reason: err.to_string(),
        })
    }

    /// Fail a job that did not reach a terminal state on its own.
    pub async fn mark_crashed(&self, job_id: &str, reason: &str) {
        let job = match self.jobs.get_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id, error = %e, "Cannot load crashed job");
                return;
            }
        };

        match job.job_status() {
            Ok(status) if status.is_terminal() => {
                debug!(job_id, %status, "Crashed job already terminal");
                return;
            }
            Ok(JobStatus::Queued) => {
                // Keep the queued -> processing -> failed path.
                match self.jobs.claim_job(job_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(job_id, "Crashed job was claimed by another run");
                        return;
                    }
                    Err(e) => {
                        error!(job_id, error = %e, "Cannot claim crashed job");
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(job_id, error = %e, "Crashed job has an unreadable status");
                return;
            }
        }

        error!(job_id, reason, "Job crashed");
        if let Err(e) = self
            .jobs
            .update_job_status(job_id, JobStatus::Failed, None)
            .await
        {
            error!(job_id, error = %e, "Cannot mark crashed job failed");
            return;
        }
        self.notify(&job, MSG_FAILED).await;
    }

    /// Startup recovery.
    ///
    /// Jobs left `processing` by a previous process are failed; ids of jobs
    /// still `queued` are returned, oldest first, for re-dispatch.
    pub async fn recover_orphaned_jobs(&self) -> Result<Vec<String>> {
        let orphaned = self.jobs.list_jobs_by_status(JobStatus::Processing).await?;
        for job in &orphaned {
            self.mark_crashed(&job.id, "interrupted by restart").await;
        }

        let queued: Vec<String> = self
            .jobs
            .list_jobs_by_status(JobStatus::Queued)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();

        if !orphaned.is_empty() || !queued.is_empty() {
            info!(
                failed = orphaned.len(),
                requeued = queued.len(),
                "Recovered jobs from previous run"
            );
        }
        Ok(queued)
    }
}

#[async_trait]
impl JobRunner for JobOrchestrator {
    async fn run_job(&self, job_id: &str, cancel: CancellationToken) -> Result<JobOutcome> {
        self.run(job_id, &cancel).await
    }

    async fn mark_crashed(&self, job_id: &str, reason: &str) {
        JobOrchestrator::mark_crashed(self, job_id, reason).await
    }
}
