//! Quota repository (the Quota Ledger).

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::Result;
use crate::database::models::QuotaDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

/// Quota repository trait.
#[async_trait]
pub trait QuotaRepository: Send + Sync {
    /// Free jobs consumed by `owner_id`, 0 if the owner is unknown.
    async fn get_consumed(&self, owner_id: i64) -> Result<i64>;

    /// Add one consumed job, creating the record if needed. Returns the new total.
    async fn increment(&self, owner_id: i64) -> Result<i64>;

    /// Same as [`Self::increment`], inside the caller's transaction. Does not commit.
    async fn increment_in_tx(&self, tx: &mut SqliteConnection, owner_id: i64) -> Result<i64>;
}

/// SQLx implementation of QuotaRepository.
pub struct SqlxQuotaRepository {
    pool: SqlitePool,
}

impl SqlxQuotaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaRepository for SqlxQuotaRepository {
    async fn get_consumed(&self, owner_id: i64) -> Result<i64> {
        let record = sqlx::query_as::<_, QuotaDbModel>("SELECT * FROM quota WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(|r| r.consumed_count).unwrap_or(0))
    }

    async fn increment(&self, owner_id: i64) -> Result<i64> {
        retry_on_sqlite_busy("increment_quota", || async {
            let mut conn = self.pool.acquire().await?;
            upsert_increment(&mut *conn, owner_id).await
        })
        .await
    }

    async fn increment_in_tx(&self, tx: &mut SqliteConnection, owner_id: i64) -> Result<i64> {
        upsert_increment(tx, owner_id).await
    }
}

/// Single upsert: the read-modify-write is atomic inside SQLite.
async fn upsert_increment(conn: &mut SqliteConnection, owner_id: i64) -> Result<i64> {
    let (consumed,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO quota (owner_id, consumed_count, updated_at)
        VALUES (?, 1, ?)
        ON CONFLICT(owner_id) DO UPDATE SET
            consumed_count = consumed_count + 1,
            updated_at = excluded.updated_at
        RETURNING consumed_count
        "#,
    )
    .bind(owner_id)
    .bind(now_ms())
    .fetch_one(conn)
    .await?;
    Ok(consumed)
}
