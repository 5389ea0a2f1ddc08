//! Job repository (the Job Store).

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::models::{JobDbModel, JobStatus};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Job repository trait.
///
/// Transitions are atomic per job id: the status check and the write happen in
/// one conditional statement, so two writers can never both move the same job.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new `queued` job and return its id.
    async fn create_job(
        &self,
        owner_id: i64,
        channel_id: i64,
        prompt: &str,
        target_duration: u32,
    ) -> Result<String>;

    /// Same as [`Self::create_job`], inside the caller's transaction.
    /// Does not commit.
    async fn create_job_in_tx(
        &self,
        tx: &mut SqliteConnection,
        owner_id: i64,
        channel_id: i64,
        prompt: &str,
        target_duration: u32,
    ) -> Result<String>;

    async fn get_job(&self, id: &str) -> Result<JobDbModel>;

    /// Take ownership of a job by moving it `queued -> processing`.
    ///
    /// Returns `false` when the job was not `queued`, i.e. another caller
    /// already claimed it or it is terminal.
    async fn claim_job(&self, id: &str) -> Result<bool>;

    /// Move a job to `status`. Re-applying the current status is a no-op, so
    /// success here does not mean the caller owns the job; that is
    /// [`Self::claim_job`].
    ///
    /// `artifact_location` may only accompany `done`.
    async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        artifact_location: Option<&str>,
    ) -> Result<()>;

    async fn list_jobs_for_owner(&self, owner_id: i64, limit: i64) -> Result<Vec<JobDbModel>>;
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<JobDbModel>>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_job(
        &self,
        owner_id: i64,
        channel_id: i64,
        prompt: &str,
        target_duration: u32,
    ) -> Result<String> {
        let job = JobDbModel::new(owner_id, channel_id, prompt, target_duration);

        retry_on_sqlite_busy("create_job", || async {
            let mut conn = self.pool.acquire().await?;
            insert_job(&mut *conn, &job).await
        })
        .await?;

        Ok(job.id)
    }

    async fn create_job_in_tx(
        &self,
        tx: &mut SqliteConnection,
        owner_id: i64,
        channel_id: i64,
        prompt: &str,
        target_duration: u32,
    ) -> Result<String> {
        let job = JobDbModel::new(owner_id, channel_id, prompt, target_duration);
        insert_job(tx, &job).await?;
        Ok(job.id)
    }

    async fn get_job(&self, id: &str) -> Result<JobDbModel> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn claim_job(&self, id: &str) -> Result<bool> {
        let affected = retry_on_sqlite_busy("claim_job", || async {
            let result = sqlx::query(
                "UPDATE job SET status = ?, updated_at = MAX(updated_at, ?) \
                 WHERE id = ? AND status = ?",
            )
            .bind(JobStatus::Processing.as_str())
            .bind(now_ms())
            .bind(id)
            .bind(JobStatus::Queued.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if affected == 1 {
            return Ok(true);
        }
        // Surfaces NotFound for unknown ids.
        self.get_job(id).await?;
        Ok(false)
    }

    async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        artifact_location: Option<&str>,
    ) -> Result<()> {
        if artifact_location.is_some() && status != JobStatus::Done {
            return Err(Error::validation(format!(
                "artifact location can only be recorded with status done, not {status}"
            )));
        }

        let predecessors = status.predecessors();
        let affected = if predecessors.is_empty() {
            0
        } else {
            let placeholders = vec!["?"; predecessors.len()].join(", ");
            let sql = format!(
                "UPDATE job SET status = ?, artifact_location = COALESCE(?, artifact_location), \
                 updated_at = MAX(updated_at, ?) WHERE id = ? AND status IN ({placeholders})"
            );

            retry_on_sqlite_busy("update_job_status", || async {
                let mut query = sqlx::query(&sql)
                    .bind(status.as_str())
                    .bind(artifact_location)
                    .bind(now_ms())
                    .bind(id);
                for prev in predecessors {
                    query = query.bind(prev.as_str());
                }
                let result = query.execute(&self.pool).await?;
                Ok(result.rows_affected())
            })
            .await?
        };

        if affected > 0 {
            return Ok(());
        }

        let current = self.get_job(id).await?.job_status()?;
        if current == status {
            return Ok(());
        }

        Err(Error::InvalidStateTransition {
            from: current.to_string(),
            to: status.to_string(),
        })
    }

    async fn list_jobs_for_owner(&self, owner_id: i64, limit: i64) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM job WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM job WHERE status = ? ORDER BY created_at, rowid",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}

async fn insert_job(conn: &mut SqliteConnection, job: &JobDbModel) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO job (id, owner_id, channel_id, prompt, target_duration, status,
                         artifact_location, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.id)
    .bind(job.owner_id)
    .bind(job.channel_id)
    .bind(&job.prompt)
    .bind(job.target_duration)
    .bind(&job.status)
    .bind(&job.artifact_location)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}
