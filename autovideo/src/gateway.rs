//! Submission Gateway: admission control in front of the worker pool.
//!
//! Validates the request, clamps the duration, applies the quota policy,
//! creates the job and hands it to the pool without waiting for any pipeline
//! work. Check, create and charge run under a per-owner lock so concurrent
//! submissions from one owner cannot both pass a last free slot. The job row
//! and the charge are committed in one transaction.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::{DurationLimits, QuotaPolicy};
use crate::database::DbPool;
use crate::database::models::JobDbModel;
use crate::database::repositories::{JobRepository, QuotaRepository};
use crate::database::retry::retry_on_sqlite_busy;
use crate::pipeline::JobSender;
use crate::{Error, Result};

/// Longest accepted prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub owner_id: i64,
    pub channel_id: i64,
    pub prompt: String,
    /// Requested duration in seconds, `None` for the default.
    pub duration_secs: Option<u32>,
}

/// An accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub job_id: String,
    pub target_duration: u32,
    /// Free jobs consumed by the owner, including this one.
    pub consumed: i64,
    pub limit: i64,
    /// Set when the owner is past the free quota and the policy is `warn`.
    pub quota_warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credits {
    pub consumed: i64,
    pub limit: i64,
}

pub struct SubmissionGateway {
    pool: DbPool,
    jobs: Arc<dyn JobRepository>,
    quota: Arc<dyn QuotaRepository>,
    sender: JobSender,
    durations: DurationLimits,
    free_jobs_per_user: i64,
    policy: QuotaPolicy,
    owner_locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
}

impl SubmissionGateway {
    pub fn new(
        pool: DbPool,
        jobs: Arc<dyn JobRepository>,
        quota: Arc<dyn QuotaRepository>,
        sender: JobSender,
        durations: DurationLimits,
        free_jobs_per_user: i64,
        policy: QuotaPolicy,
    ) -> Self {
        Self {
            pool,
            jobs,
            quota,
            sender,
            durations,
            free_jobs_per_user,
            policy,
            owner_locks: DashMap::new(),
        }
    }

    pub fn durations(&self) -> DurationLimits {
        self.durations
    }

    pub fn free_jobs_per_user(&self) -> i64 {
        self.free_jobs_per_user
    }

    fn owner_lock(&self, owner_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.owner_locks.entry(owner_id).or_default().clone()
    }

    /// Admit a request and queue its job.
    pub async fn submit(&self, request: SubmissionRequest) -> Result<Submission> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(Error::validation("prompt must not be empty"));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(Error::validation(format!(
                "prompt must be at most {MAX_PROMPT_CHARS} characters"
            )));
        }
        let target_duration = self.durations.clamp(request.duration_secs);

        let lock = self.owner_lock(request.owner_id);
        let result = {
            let _guard = lock.lock().await;
            self.admit(&request, prompt, target_duration).await
        };
        drop(lock);
        self.owner_locks
            .remove_if(&request.owner_id, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn admit(
        &self,
        request: &SubmissionRequest,
        prompt: &str,
        target_duration: u32,
    ) -> Result<Submission> {
        let owner_id = request.owner_id;
        let limit = self.free_jobs_per_user;

        let consumed = self.quota.get_consumed(owner_id).await?;
        let quota_warning = if consumed >= limit {
            match self.policy {
                QuotaPolicy::Block => {
                    info!(owner_id, consumed, limit, "Submission rejected: quota exceeded");
                    return Err(Error::QuotaExceeded {
                        owner_id,
                        consumed,
                        limit,
                    });
                }
                QuotaPolicy::Warn => {
                    warn!(owner_id, consumed, limit, "Owner past free quota, admitting");
                    Some(format!(
                        "You have already used {consumed} free requests (limit {limit})."
                    ))
                }
            }
        } else {
            None
        };

        // Reserve before creating so a full queue leaves no job row and no charge.
        let permit = self.sender.try_reserve()?;

        let (job_id, consumed) = retry_on_sqlite_busy("admit_job", || {
            self.create_charged(owner_id, request.channel_id, prompt, target_duration)
        })
        .await?;

        permit.send(job_id.clone());
        info!(
            job_id = %job_id,
            owner_id,
            target_duration,
            consumed,
            "Job queued"
        );

        Ok(Submission {
            job_id,
            target_duration,
            consumed,
            limit,
            quota_warning,
        })
    }

    /// Insert the job and charge the owner atomically. Nothing is kept if
    /// either write fails.
    async fn create_charged(
        &self,
        owner_id: i64,
        channel_id: i64,
        prompt: &str,
        target_duration: u32,
    ) -> Result<(String, i64)> {
        let mut tx = self.pool.begin().await?;
        let job_id = self
            .jobs
            .create_job_in_tx(&mut *tx, owner_id, channel_id, prompt, target_duration)
            .await?;
        let consumed = self.quota.increment_in_tx(&mut *tx, owner_id).await?;
        tx.commit().await?;
        Ok((job_id, consumed))
    }

    pub async fn job(&self, job_id: &str) -> Result<JobDbModel> {
        self.jobs.get_job(job_id).await
    }

    /// Newest jobs of `owner_id` first.
    pub async fn recent_jobs(&self, owner_id: i64, limit: i64) -> Result<Vec<JobDbModel>> {
        self.jobs.list_jobs_for_owner(owner_id, limit).await
    }

    pub async fn credits(&self, owner_id: i64) -> Result<Credits> {
        Ok(Credits {
            consumed: self.quota.get_consumed(owner_id).await?,
            limit: self.free_jobs_per_user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::database::models::JobStatus;
    use crate::database::repositories::{SqlxJobRepository, SqlxQuotaRepository};
    use crate::database::{init_pool_with_size, run_migrations};
    use crate::pipeline::WorkerPool;

    struct Harness {
        gateway: Arc<SubmissionGateway>,
        jobs: Arc<dyn JobRepository>,
        quota: Arc<dyn QuotaRepository>,
        // Keeps the queue receiver alive.
        _pool: WorkerPool,
    }

    async fn harness(policy: QuotaPolicy, limit: i64, queue_capacity: usize) -> Harness {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let quota: Arc<dyn QuotaRepository> = Arc::new(SqlxQuotaRepository::new(pool.clone()));
        let (worker_pool, sender) = WorkerPool::new(&WorkerConfig {
            max_workers: 1,
            queue_capacity,
            job_timeout_secs: 60,
        });
        let gateway = Arc::new(SubmissionGateway::new(
            pool,
            jobs.clone(),
            quota.clone(),
            sender,
            DurationLimits::default(),
            limit,
            policy,
        ));
        Harness {
            gateway,
            jobs,
            quota,
            _pool: worker_pool,
        }
    }

    /// Ledger that reads as empty and rejects every charge.
    struct BrokenLedger;

    #[async_trait::async_trait]
    impl QuotaRepository for BrokenLedger {
        async fn get_consumed(&self, _owner_id: i64) -> Result<i64> {
            Ok(0)
        }

        async fn increment(&self, _owner_id: i64) -> Result<i64> {
            Err(Error::Database("ledger offline".into()))
        }

        async fn increment_in_tx(
            &self,
            _tx: &mut sqlx::SqliteConnection,
            _owner_id: i64,
        ) -> Result<i64> {
            Err(Error::Database("ledger offline".into()))
        }
    }

    fn request(owner_id: i64, prompt: &str, duration_secs: Option<u32>) -> SubmissionRequest {
        SubmissionRequest {
            owner_id,
            channel_id: owner_id * 10,
            prompt: prompt.to_string(),
            duration_secs,
        }
    }

    #[tokio::test]
    async fn test_accept_creates_queued_job_and_charges_once() {
        let h = harness(QuotaPolicy::Block, 3, 8).await;

        let sub = h
            .gateway
            .submit(request(1, "  Turbo omelette  ", Some(45)))
            .await
            .unwrap();

        assert_eq!(sub.target_duration, 45);
        assert_eq!(sub.consumed, 1);
        assert!(sub.quota_warning.is_none());
        let job = h.jobs.get_job(&sub.job_id).await.unwrap();
        assert_eq!(job.job_status().unwrap(), JobStatus::Queued);
        assert_eq!(job.prompt, "Turbo omelette");
        assert_eq!(job.channel_id, 10);
        assert_eq!(h.quota.get_consumed(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duration_is_clamped() {
        let h = harness(QuotaPolicy::Block, 10, 8).await;

        let short = h.gateway.submit(request(1, "a", Some(1))).await.unwrap();
        let long = h.gateway.submit(request(1, "b", Some(10_000))).await.unwrap();
        let default = h.gateway.submit(request(1, "c", None)).await.unwrap();

        assert_eq!(short.target_duration, 10);
        assert_eq!(long.target_duration, 480);
        assert_eq!(default.target_duration, 60);
    }

    #[tokio::test]
    async fn test_block_policy_rejects_without_charge() {
        let h = harness(QuotaPolicy::Block, 2, 8).await;
        for _ in 0..2 {
            h.gateway.submit(request(5, "topic", None)).await.unwrap();
        }

        let err = h.gateway.submit(request(5, "topic", None)).await.unwrap_err();

        assert!(matches!(
            err,
            Error::QuotaExceeded {
                consumed: 2,
                limit: 2,
                ..
            }
        ));
        assert_eq!(h.quota.get_consumed(5).await.unwrap(), 2);
        assert_eq!(h.jobs.list_jobs_for_owner(5, 10).await.unwrap().len(), 2);
        // Other owners are unaffected.
        assert!(h.gateway.submit(request(6, "topic", None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_warn_policy_admits_with_warning() {
        let h = harness(QuotaPolicy::Warn, 1, 8).await;
        h.gateway.submit(request(5, "first", None)).await.unwrap();

        let sub = h.gateway.submit(request(5, "second", None)).await.unwrap();

        assert_eq!(sub.consumed, 2);
        assert!(sub.quota_warning.is_some());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_job_or_charge() {
        let h = harness(QuotaPolicy::Block, 10, 1).await;
        h.gateway.submit(request(1, "fills the queue", None)).await.unwrap();

        let err = h.gateway.submit(request(1, "rejected", None)).await.unwrap_err();

        assert!(matches!(err, Error::QueueFull));
        assert_eq!(h.quota.get_consumed(1).await.unwrap(), 1);
        assert_eq!(h.jobs.list_jobs_for_owner(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_charge_leaves_no_job() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let (_worker_pool, sender) = WorkerPool::new(&WorkerConfig {
            max_workers: 1,
            queue_capacity: 1,
            job_timeout_secs: 60,
        });
        let gateway = SubmissionGateway::new(
            pool,
            jobs.clone(),
            Arc::new(BrokenLedger),
            sender,
            DurationLimits::default(),
            3,
            QuotaPolicy::Block,
        );

        for _ in 0..2 {
            let err = gateway.submit(request(1, "topic", None)).await.unwrap_err();
            // The queue slot is released each time, so this never turns into QueueFull.
            assert!(matches!(err, Error::Database(_)), "got {err:?}");
        }

        assert!(jobs.list_jobs_for_owner(1, 10).await.unwrap().is_empty());
        assert!(
            jobs.list_jobs_by_status(JobStatus::Queued)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_invalid_prompt_rejected() {
        let h = harness(QuotaPolicy::Block, 3, 8).await;

        assert!(matches!(
            h.gateway.submit(request(1, "   ", None)).await,
            Err(Error::Validation(_))
        ));
        let long = "x".repeat(MAX_PROMPT_CHARS + 1);
        assert!(matches!(
            h.gateway.submit(request(1, &long, None)).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(h.quota.get_consumed(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_charge_exactly_once_each() {
        let h = harness(QuotaPolicy::Block, 3, 16).await;

        let mut handles = Vec::new();
        for i in 0..6 {
            let gateway = h.gateway.clone();
            handles.push(tokio::spawn(async move {
                gateway.submit(request(9, &format!("topic {i}"), None)).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 3);
        assert_eq!(h.quota.get_consumed(9).await.unwrap(), 3);
        assert_eq!(h.gateway.credits(9).await.unwrap().consumed, 3);
    }
}
