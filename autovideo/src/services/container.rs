//! Process wiring: one [`AppConfig`] in, a running job system out.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bot::TelegramBot;
use crate::config::AppConfig;
use crate::database::repositories::{
    JobRepository, QuotaRepository, SqlxJobRepository, SqlxQuotaRepository,
};
use crate::gateway::SubmissionGateway;
use crate::notification::TelegramClient;
use crate::pipeline::{Capabilities, JobOrchestrator, JobSender, WorkerPool};
use crate::utils::{fs, http_client};
use crate::{Error, Result};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for provider requests. Polling requests set their own.
const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ServiceContainer {
    pub config: Arc<AppConfig>,
    pub pool: SqlitePool,
    pub job_repo: Arc<dyn JobRepository>,
    pub quota_repo: Arc<dyn QuotaRepository>,
    pub telegram: Arc<TelegramClient>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub gateway: Arc<SubmissionGateway>,
    worker_pool: WorkerPool,
    job_sender: JobSender,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Wire every service from `config` on top of a migrated pool.
    pub async fn new(config: AppConfig, pool: SqlitePool) -> Result<Self> {
        info!(db = %config.database_url, "Wiring services");

        let token = config
            .telegram_token
            .clone()
            .ok_or_else(|| Error::config("TELEGRAM_TOKEN is not set"))?;

        fs::ensure_dir_all_with_op("creating output directory", &config.output_dir).await?;
        fs::ensure_dir_all_with_op("creating work directory", &config.work_dir).await?;

        let job_repo: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let quota_repo: Arc<dyn QuotaRepository> =
            Arc::new(SqlxQuotaRepository::new(pool.clone()));

        let provider_client = http_client::build_client(PROVIDER_REQUEST_TIMEOUT)?;
        // Bot API requests set per-call timeouts (long polling, uploads).
        let telegram_client = http_client::build_client(Duration::ZERO)?;
        let telegram = Arc::new(TelegramClient::new(telegram_client, token));

        let stages = Arc::new(Capabilities::from_config(&config, provider_client));
        let orchestrator = Arc::new(JobOrchestrator::new(
            job_repo.clone(),
            telegram.clone(),
            stages,
            config.work_dir.clone(),
            config.output_dir.clone(),
        ));

        let (worker_pool, job_sender) = WorkerPool::new(&config.workers);
        let gateway = Arc::new(SubmissionGateway::new(
            pool.clone(),
            job_repo.clone(),
            quota_repo.clone(),
            job_sender.clone(),
            config.durations,
            config.free_jobs_per_user,
            config.quota_policy,
        ));

        Ok(Self {
            config: Arc::new(config),
            pool,
            job_repo,
            quota_repo,
            telegram,
            orchestrator,
            gateway,
            worker_pool,
            job_sender,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start the workers and recover jobs left over by a previous run.
    pub async fn initialize(&self) -> Result<()> {
        self.worker_pool.start(self.orchestrator.clone());

        let queued = self.orchestrator.recover_orphaned_jobs().await?;
        if !queued.is_empty() {
            let sender = self.job_sender.clone();
            let cancel = self.cancellation_token.clone();
            // The queue may be smaller than the backlog; feed it as workers drain it.
            tokio::spawn(async move {
                for job_id in queued {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = sender.send(job_id.clone()) => {
                            if let Err(e) = result {
                                warn!(job_id = %job_id, error = %e, "Failed to re-dispatch job");
                                break;
                            }
                        }
                    }
                }
            });
        }

        info!(
            max_workers = self.config.workers.max_workers,
            queue_capacity = self.config.workers.queue_capacity,
            "Services initialized"
        );
        Ok(())
    }

    /// Chat front end bound to this container's gateway.
    pub fn bot(&self) -> TelegramBot {
        TelegramBot::new(self.telegram.clone(), self.gateway.clone())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop intake, wait up to `timeout` for running jobs, then close the pool.
    ///
    /// Jobs still running when the timeout expires stay `processing` and are
    /// failed by startup recovery on the next run.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!(?timeout, active_jobs = self.worker_pool.active_count(), "Shutting down");

        self.cancellation_token.cancel();

        if tokio::time::timeout(timeout, self.worker_pool.stop())
            .await
            .is_err()
        {
            warn!(
                active_jobs = self.worker_pool.active_count(),
                "Shutdown timeout reached, abandoning running jobs"
            );
        }

        self.pool.close().await;
        info!("Shutdown complete");
        Ok(())
    }

    /// Token cancelled by [`Self::shutdown`]; background tasks select on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
