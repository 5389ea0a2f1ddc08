//! Busy-retry for SQLite writes.
//!
//! WAL allows one writer at a time. A writer that loses the race past the
//! connection busy timeout gets `SQLITE_BUSY`/`SQLITE_LOCKED`; those writes
//! are retried with capped exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

const MAX_ATTEMPTS: u32 = 8;
const BASE_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Primary result codes for SQLITE_BUSY and SQLITE_LOCKED.
const BUSY_CODES: [&str; 2] = ["5", "6"];

fn mentions_lock(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

/// Whether `err` is SQLite contention rather than a real failure.
fn is_contention(err: &Error) -> bool {
    match err {
        Error::DatabaseSqlx(sqlx::Error::Database(db_err)) => {
            db_err
                .code()
                .is_some_and(|code| BUSY_CODES.contains(&&*code))
                || mentions_lock(db_err.message())
        }
        Error::DatabaseSqlx(other) => mentions_lock(&other.to_string()),
        _ => false,
    }
}

/// Delay before retry number `attempt` (0-based), jitter included.
fn backoff(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let capped = exp.min(MAX_DELAY);
    let jitter_ms = rand::random::<u64>() % (capped.as_millis() as u64 / 4 + 1);
    (capped + Duration::from_millis(jitter_ms)).min(MAX_DELAY)
}

/// Run `op` until it succeeds, fails with a non-contention error, or
/// `MAX_ATTEMPTS` retries are used up.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && is_contention(&err) => err,
            Err(err) => return Err(err),
        };

        let delay = backoff(attempt);
        attempt += 1;
        debug!(
            op = op_name,
            attempt,
            max_attempts = MAX_ATTEMPTS,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "SQLite busy, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
