//! Outbound messaging to the user who submitted a job.

pub mod telegram;

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

pub use telegram::TelegramClient;

/// Chat transport used by the orchestrator. Both calls are best-effort from
/// the job's point of view: failures are logged, never fatal.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn notify(&self, channel_id: i64, text: &str) -> Result<()>;

    async fn deliver_video(&self, channel_id: i64, path: &Path) -> Result<()>;
}
