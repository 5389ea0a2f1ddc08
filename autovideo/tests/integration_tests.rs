//! Integration tests for the autovideo database layer.
//!
//! These run the real migrations against SQLite, in memory for most cases
//! and on disk where durability or concurrent writers matter.

use std::sync::Arc;

use autovideo::Error;
use autovideo::database::models::JobStatus;
use autovideo::database::repositories::{
    JobRepository, QuotaRepository, SqlxJobRepository, SqlxQuotaRepository,
};
use autovideo::database::{DbPool, init_pool, init_pool_with_size, run_migrations};

/// Helper to create a test database pool with migrations applied.
async fn setup_test_db() -> DbPool {
    // In-memory databases are per connection.
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

fn file_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("autovideo.db").display())
}

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let pool = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"job"), "job table missing");
        assert!(table_names.contains(&"quota"), "quota table missing");
    }

    #[tokio::test]
    async fn test_wal_mode_enabled_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&file_url(&dir)).await.unwrap();

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("Failed to query journal mode");
        assert_eq!(result.0.to_lowercase(), "wal");
    }
}

mod job_store_tests {
    use super::*;

    async fn repo() -> SqlxJobRepository {
        SqlxJobRepository::new(setup_test_db().await)
    }

    #[tokio::test]
    async fn test_create_and_get_job() {
        let repo = repo().await;
        let id = repo
            .create_job(7, 70, "How to boil an egg", 45)
            .await
            .unwrap();

        let job = repo.get_job(&id).await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.id.len(), 32);
        assert_eq!(job.owner_id, 7);
        assert_eq!(job.channel_id, 70);
        assert_eq!(job.prompt, "How to boil an egg");
        assert_eq!(job.target_duration_secs(), 45);
        assert_eq!(job.job_status().unwrap(), JobStatus::Queued);
        assert!(job.artifact_location.is_none());
    }

    #[tokio::test]
    async fn test_job_ids_are_unique() {
        let repo = repo().await;
        let a = repo.create_job(1, 1, "a", 30).await.unwrap();
        let b = repo.create_job(1, 1, "a", 30).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let repo = repo().await;
        let err = repo.get_job("does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_done() {
        let repo = repo().await;
        let id = repo.create_job(1, 1, "topic", 30).await.unwrap();

        repo.update_job_status(&id, JobStatus::Processing, None)
            .await
            .unwrap();
        repo.update_job_status(&id, JobStatus::Done, Some("/out/video.mp4"))
            .await
            .unwrap();

        let job = repo.get_job(&id).await.unwrap();
        assert_eq!(job.job_status().unwrap(), JobStatus::Done);
        assert_eq!(job.artifact_location.as_deref(), Some("/out/video.mp4"));
        assert!(job.updated_at >= job.created_at);
    }

    #[tokio::test]
    async fn test_reapplying_status_is_noop() {
        let repo = repo().await;
        let id = repo.create_job(1, 1, "topic", 30).await.unwrap();
        repo.update_job_status(&id, JobStatus::Processing, None)
            .await
            .unwrap();
        repo.update_job_status(&id, JobStatus::Failed, None)
            .await
            .unwrap();

        repo.update_job_status(&id, JobStatus::Failed, None)
            .await
            .unwrap();
        assert_eq!(
            repo.get_job(&id).await.unwrap().job_status().unwrap(),
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let repo = repo().await;
        let id = repo.create_job(1, 1, "topic", 30).await.unwrap();

        // queued cannot skip processing
        let err = repo
            .update_job_status(&id, JobStatus::Done, Some("/x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        repo.update_job_status(&id, JobStatus::Processing, None)
            .await
            .unwrap();
        repo.update_job_status(&id, JobStatus::Failed, None)
            .await
            .unwrap();

        // terminal stays terminal
        for next in [JobStatus::Queued, JobStatus::Processing, JobStatus::Done] {
            let err = repo.update_job_status(&id, next, None).await.unwrap_err();
            assert!(
                matches!(err, Error::InvalidStateTransition { .. }),
                "{next} should be rejected"
            );
        }
        assert_eq!(
            repo.get_job(&id).await.unwrap().job_status().unwrap(),
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let repo = repo().await;
        let id = repo.create_job(1, 1, "topic", 30).await.unwrap();

        assert!(repo.claim_job(&id).await.unwrap());
        assert!(!repo.claim_job(&id).await.unwrap());
        assert_eq!(
            repo.get_job(&id).await.unwrap().job_status().unwrap(),
            JobStatus::Processing
        );

        // A repeated status write is an idempotent no-op and still leaves the
        // job claimed exactly once.
        repo.update_job_status(&id, JobStatus::Processing, None)
            .await
            .unwrap();
        assert!(!repo.claim_job(&id).await.unwrap());

        repo.update_job_status(&id, JobStatus::Done, Some("/out.mp4"))
            .await
            .unwrap();
        assert!(!repo.claim_job(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_unknown_job_is_not_found() {
        let repo = repo().await;
        let err = repo.claim_job("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&file_url(&dir)).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqlxJobRepository::new(pool));

        for _ in 0..20 {
            let id = repo.create_job(1, 1, "topic", 30).await.unwrap();
            let claims: Vec<_> = (0..4)
                .map(|_| {
                    let repo = repo.clone();
                    let id = id.clone();
                    tokio::spawn(async move { repo.claim_job(&id).await })
                })
                .collect();

            let mut winners = 0;
            for claim in claims {
                if claim.await.unwrap().unwrap() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "job {id} claimed {winners} times");
        }
    }

    #[tokio::test]
    async fn test_artifact_only_with_done() {
        let repo = repo().await;
        let id = repo.create_job(1, 1, "topic", 30).await.unwrap();

        let err = repo
            .update_job_status(&id, JobStatus::Processing, Some("/x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(repo.get_job(&id).await.unwrap().artifact_location.is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_not_found() {
        let repo = repo().await;
        let err = repo
            .update_job_status("missing", JobStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_jobs_for_owner_newest_first() {
        let repo = repo().await;
        let first = repo.create_job(5, 5, "first", 30).await.unwrap();
        let second = repo.create_job(5, 5, "second", 30).await.unwrap();
        let third = repo.create_job(5, 5, "third", 30).await.unwrap();
        repo.create_job(6, 6, "someone else", 30).await.unwrap();

        let jobs = repo.list_jobs_for_owner(5, 10).await.unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec![third.as_str(), second.as_str(), first.as_str()]);

        let limited = repo.list_jobs_for_owner(5, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, third);
    }

    #[tokio::test]
    async fn test_list_jobs_by_status_oldest_first() {
        let repo = repo().await;
        let a = repo.create_job(1, 1, "a", 30).await.unwrap();
        let b = repo.create_job(2, 2, "b", 30).await.unwrap();
        let c = repo.create_job(3, 3, "c", 30).await.unwrap();
        repo.update_job_status(&b, JobStatus::Processing, None)
            .await
            .unwrap();

        let queued = repo.list_jobs_by_status(JobStatus::Queued).await.unwrap();
        let ids: Vec<&str> = queued.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), c.as_str()]);

        let processing = repo
            .list_jobs_by_status(JobStatus::Processing)
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, b);
    }

    #[tokio::test]
    async fn test_concurrent_transitions_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&file_url(&dir)).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqlxJobRepository::new(pool));
        let id = repo.create_job(1, 1, "topic", 30).await.unwrap();
        repo.update_job_status(&id, JobStatus::Processing, None)
            .await
            .unwrap();

        let done = {
            let repo = repo.clone();
            let id = id.clone();
            tokio::spawn(async move {
                repo.update_job_status(&id, JobStatus::Done, Some("/out.mp4"))
                    .await
            })
        };
        let failed = {
            let repo = repo.clone();
            let id = id.clone();
            tokio::spawn(async move { repo.update_job_status(&id, JobStatus::Failed, None).await })
        };

        let results = [done.await.unwrap(), failed.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let job = repo.get_job(&id).await.unwrap();
        match job.job_status().unwrap() {
            JobStatus::Done => assert_eq!(job.artifact_location.as_deref(), Some("/out.mp4")),
            JobStatus::Failed => assert!(job.artifact_location.is_none()),
            other => panic!("unexpected status {other}"),
        }
    }
}

mod quota_ledger_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_owner_has_zero() {
        let repo = SqlxQuotaRepository::new(setup_test_db().await);
        assert_eq!(repo.get_consumed(42).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_is_monotonic_per_owner() {
        let repo = SqlxQuotaRepository::new(setup_test_db().await);

        assert_eq!(repo.increment(1).await.unwrap(), 1);
        assert_eq!(repo.increment(1).await.unwrap(), 2);
        assert_eq!(repo.increment(2).await.unwrap(), 1);

        assert_eq!(repo.get_consumed(1).await.unwrap(), 2);
        assert_eq!(repo.get_consumed(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&file_url(&dir)).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqlxQuotaRepository::new(pool));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.increment(9).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(repo.get_consumed(9).await.unwrap(), 20);
    }
}

mod durability_tests {
    use super::*;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = file_url(&dir);

        let id = {
            let pool = init_pool(&url).await.unwrap();
            run_migrations(&pool).await.unwrap();
            let jobs = SqlxJobRepository::new(pool.clone());
            let quota = SqlxQuotaRepository::new(pool.clone());

            let id = jobs.create_job(3, 30, "persist me", 60).await.unwrap();
            jobs.update_job_status(&id, JobStatus::Processing, None)
                .await
                .unwrap();
            quota.increment(3).await.unwrap();
            pool.close().await;
            id
        };

        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let jobs = SqlxJobRepository::new(pool.clone());
        let quota = SqlxQuotaRepository::new(pool);

        let job = jobs.get_job(&id).await.unwrap();
        assert_eq!(job.job_status().unwrap(), JobStatus::Processing);
        assert_eq!(job.prompt, "persist me");
        assert_eq!(quota.get_consumed(3).await.unwrap(), 1);
    }
}
