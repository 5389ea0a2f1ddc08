//! Tracing setup for the bot process.
//!
//! Events go to the console and to a daily rolling file under the log
//! directory. Rotated files past the retention window are pruned by a
//! background sweep.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::utils::fs;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "autovideo=info,sqlx=warn";

/// Active file name; rotated files carry a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_PREFIX: &str = "autovideo.log";

const RETENTION_DAYS: u64 = 7;
const SWEEP_EVERY: Duration = Duration::from_secs(60 * 60 * 24);

struct LocalClock;

impl FormatTime for LocalClock {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Handle returned by [`init_logging`].
pub struct LogHandle {
    dir: PathBuf,
    retention_days: u64,
}

impl LogHandle {
    pub fn log_dir(&self) -> &Path {
        &self.dir
    }

    /// Spawn the daily sweep of expired log files. Stops on `cancel`.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel: CancellationToken) {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_EVERY);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let today = Local::now().date_naive();
                        if let Err(e) = prune_logs(&handle.dir, today, handle.retention_days).await {
                            warn!(error = %e, dir = %handle.dir.display(), "Log sweep failed");
                        }
                    }
                }
            }
            debug!("Log sweep stopped");
        });
    }
}

fn rotation_date(file_name: &str) -> Option<NaiveDate> {
    let suffix = file_name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}

/// Remove rotated files dated more than `keep_days` before `today`.
async fn prune_logs(dir: &Path, today: NaiveDate, keep_days: u64) -> std::io::Result<usize> {
    let Some(oldest_kept) = today.checked_sub_days(chrono::Days::new(keep_days)) else {
        return Ok(0);
    };

    let mut removed = 0;
    let mut dir_entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = dir_entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let expired = entry
            .file_name()
            .to_str()
            .and_then(rotation_date)
            .is_some_and(|date| date < oldest_kept);
        if !expired {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove log file"),
        }
    }

    if removed > 0 {
        info!(removed, "Pruned expired log files");
    }
    Ok(removed)
}

/// Install the global subscriber.
///
/// The [`WorkerGuard`] flushes the file writer when dropped, so `main` holds
/// it until exit.
pub fn init_logging(log_dir: &str) -> crate::Result<(Arc<LogHandle>, WorkerGuard)> {
    let dir = PathBuf::from(log_dir);
    fs::ensure_dir_all_sync_with_op("creating log directory", &dir)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console = fmt::layer().with_timer(LocalClock).with_target(true);
    let file = fmt::layer()
        .with_timer(LocalClock)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("tracing subscriber already set: {e}")))?;

    let handle = Arc::new(LogHandle {
        dir,
        retention_days: RETENTION_DAYS,
    });
    Ok((handle, guard))
}
