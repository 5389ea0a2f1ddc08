//! Telegram long-polling front end.
//!
//! Thin glue: parses commands, keeps the `/newvideo` conversation state and
//! forwards requests to the [`SubmissionGateway`].

pub mod commands;
pub mod conversation;

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::gateway::{MAX_PROMPT_CHARS, SubmissionGateway, SubmissionRequest};
use crate::notification::TelegramClient;
use crate::notification::telegram::Message;

pub use commands::{Command, parse_command, parse_prompt};
pub use conversation::PendingPrompts;

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const RECENT_JOBS_LIMIT: i64 = 5;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct TelegramBot {
    api: Arc<TelegramClient>,
    gateway: Arc<SubmissionGateway>,
    pending: PendingPrompts,
}

impl TelegramBot {
    pub fn new(api: Arc<TelegramClient>, gateway: Arc<SubmissionGateway>) -> Self {
        Self {
            api,
            gateway,
            pending: PendingPrompts::default(),
        }
    }

    /// Poll for updates until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Starting Telegram bot (polling)");
        let mut offset = 0i64;

        loop {
            let updates = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.api.get_updates(offset, POLL_TIMEOUT_SECS) => result,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.handle_message(message).await;
                        }
                    }
                    let expired = self.pending.prune();
                    if expired > 0 {
                        debug!(expired, "Dropped stale /newvideo conversations");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Telegram bot stopped");
    }

    async fn handle_message(&self, message: Message) {
        let (Some(text), Some(from)) = (message.text.as_deref(), message.from.as_ref()) else {
            return;
        };
        let chat_id = message.chat.id;

        debug!(chat_id, user_id = from.id, "Incoming message");
        let reply = self.respond(chat_id, from.id, text).await;
        if let Err(e) = self.api.send_message(chat_id, &reply).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }

    /// Reply text for one incoming message.
    pub async fn respond(&self, chat_id: i64, user_id: i64, text: &str) -> String {
        match parse_command(text) {
            Some(Command::Start) => start_text(),
            Some(Command::Help) => self.help_text().await,
            Some(Command::NewVideo) => {
                self.pending.start(chat_id, user_id);
                "Send the topic of your video. You can add a duration in seconds after a comma.\n\
                 Example: Three money-saving tips, 60"
                    .to_string()
            }
            Some(Command::Status(job_id)) => self.status_text(user_id, job_id).await,
            Some(Command::Jobs) => self.jobs_text(user_id).await,
            Some(Command::Credits) => self.credits_text(user_id).await,
            Some(Command::Cancel) => {
                self.pending.cancel(chat_id, user_id);
                "Cancelled.".to_string()
            }
            Some(Command::Unknown(_)) => {
                "Unknown command. Send /help for the list of commands.".to_string()
            }
            None if self.pending.take(chat_id, user_id) => {
                self.submit_text(chat_id, user_id, text).await
            }
            None => "Send /newvideo to create a video.".to_string(),
        }
    }

    async fn submit_text(&self, chat_id: i64, user_id: i64, text: &str) -> String {
        let (prompt, duration_secs) = parse_prompt(text);
        let request = SubmissionRequest {
            owner_id: user_id,
            channel_id: chat_id,
            prompt,
            duration_secs,
        };

        match self.gateway.submit(request).await {
            Ok(submission) => {
                let mut reply = format!(
                    "Job queued. ID: {}\nDuration: {}s\nI will send the result here.",
                    submission.job_id, submission.target_duration
                );
                if let Some(warning) = submission.quota_warning {
                    reply = format!("{warning}\n\n{reply}");
                }
                reply
            }
            Err(Error::QuotaExceeded {
                consumed, limit, ..
            }) => format!(
                "You have used {consumed} free requests (limit {limit}). \
                 Paid access is not available yet."
            ),
            Err(Error::QueueFull) => {
                "The queue is full right now, please try again in a few minutes.".to_string()
            }
            Err(Error::Validation(_)) => format!(
                "Please send a topic of 1 to {MAX_PROMPT_CHARS} characters. Send /newvideo to try again."
            ),
            Err(e) => {
                error!(user_id, error = %e, "Submission failed");
                "Could not create the job, please try again later.".to_string()
            }
        }
    }

    async fn help_text(&self) -> String {
        let limits = self.gateway.durations();
        format!(
            "How to create a video:\n\
             1) Send /newvideo\n\
             2) Send a topic and optionally a duration in seconds after a comma, e.g.:\n   \
             How to make a turbo omelette, 45\n\n\
             Durations are kept between {}s and {}s (default {}s).\n\
             Each user has {} free requests.",
            limits.min_secs,
            limits.max_secs,
            limits.default_secs,
            self.gateway.free_jobs_per_user()
        )
    }

    async fn status_text(&self, user_id: i64, job_id: Option<String>) -> String {
        let Some(job_id) = job_id else {
            return "Usage: /status <job_id>".to_string();
        };

        match self.gateway.job(&job_id).await {
            Ok(job) if job.owner_id == user_id => format!(
                "ID: {}\nStatus: {}\nTopic: {}\nDuration: {}s\nCreated: {}\nUpdated: {}",
                job.id,
                job.status,
                job.prompt,
                job.target_duration,
                job.created_at_utc()
                    .with_timezone(&Local)
                    .format(TIME_FORMAT),
                job.updated_at_utc()
                    .with_timezone(&Local)
                    .format(TIME_FORMAT)
            ),
            Ok(_) | Err(Error::NotFound { .. }) => "Job not found.".to_string(),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Status lookup failed");
                "Could not look up the job, please try again later.".to_string()
            }
        }
    }

    async fn jobs_text(&self, user_id: i64) -> String {
        match self.gateway.recent_jobs(user_id, RECENT_JOBS_LIMIT).await {
            Ok(jobs) if jobs.is_empty() => "You have no jobs yet.".to_string(),
            Ok(jobs) => {
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|job| {
                        let topic: String = job.prompt.chars().take(40).collect();
                        format!("• {} [{}] {}", job.id, job.status, topic)
                    })
                    .collect();
                format!("Your recent jobs:\n{}", lines.join("\n"))
            }
            Err(e) => {
                error!(user_id, error = %e, "Job listing failed");
                "Could not list your jobs, please try again later.".to_string()
            }
        }
    }

    async fn credits_text(&self, user_id: i64) -> String {
        match self.gateway.credits(user_id).await {
            Ok(credits) => format!(
                "Free requests used: {}/{}",
                credits.consumed, credits.limit
            ),
            Err(e) => {
                error!(user_id, error = %e, "Credits lookup failed");
                "Could not read your credits, please try again later.".to_string()
            }
        }
    }
}

fn start_text() -> String {
    "Hi! I'm AutoVideoBot, I make videos from a short description.\n\n\
     Commands:\n\
     /newvideo - create a video\n\
     /status <job_id> - job status\n\
     /jobs - your recent jobs\n\
     /credits - free requests used\n\
     /help - help"
        .to_string()
}
