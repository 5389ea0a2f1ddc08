//! Telegram Bot API client.
//!
//! Used both as the orchestrator's [`Transport`] and by the long-polling
//! front end. 429 responses are retried after the `parameters.retry_after`
//! delay returned in the JSON body.

use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::Transport;
use crate::{Error, Result};

const API_BASE: &str = "https://api.telegram.org";

const RATE_LIMIT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// `sendMessage` text limit, in characters.
const MESSAGE_CHAR_LIMIT: usize = 4096;
const CUT_MARKER: &str = "\n\n[truncated]";

/// Bot API upload limit for `sendVideo`.
const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

const VIDEO_FILE_NAME: &str = "auto_video.mp4";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

pub struct TelegramClient {
    client: Client,
    token: String,
}

impl TelegramClient {
    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    /// Issue a Bot API call. `build` is invoked once per attempt since a
    /// multipart body cannot be replayed.
    async fn call<F>(&self, method: &str, build: F) -> Result<serde_json::Value>
    where
        F: Fn(&Client, &str) -> Result<reqwest::RequestBuilder>,
    {
        let url = self.method_url(method);

        for attempt in 1..=RATE_LIMIT_ATTEMPTS {
            let response = build(&self.client, &url)?.send().await.map_err(|e| {
                // The URL embeds the bot token.
                Error::Other(format!("Telegram {method}: {}", e.without_url()))
            })?;
            let status = response.status();
            let reply: ApiResponse = response
                .json()
                .await
                .map_err(|e| Error::Other(format!("Telegram {method}: unreadable reply: {e}")))?;

            if reply.ok {
                return Ok(reply.result);
            }
            if status != StatusCode::TOO_MANY_REQUESTS {
                let reason = reply.description.unwrap_or_default();
                warn!(method, %status, reason = %reason, "Bot API call rejected");
                return Err(Error::Other(format!("Telegram {method}: {status} {reason}")));
            }
            if attempt == RATE_LIMIT_ATTEMPTS {
                break;
            }

            let delay = retry_delay(reply.parameters.as_ref());
            debug!(method, attempt, ?delay, "Bot API rate limited");
            tokio::time::sleep(delay).await;
        }

        warn!(method, attempts = RATE_LIMIT_ATTEMPTS, "Bot API rate limit persisted");
        Err(Error::Other(format!(
            "Telegram {method}: still rate limited after {RATE_LIMIT_ATTEMPTS} attempts"
        )))
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "text": fit_message(text),
        });
        self.call("sendMessage", |client, url| {
            Ok(client.post(url).json(&payload))
        })
        .await?;
        Ok(())
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let payload = json!({ "chat_id": chat_id, "action": action });
        self.call("sendChatAction", |client, url| {
            Ok(client.post(url).json(&payload))
        })
        .await?;
        Ok(())
    }

    pub async fn send_video(&self, chat_id: i64, path: &Path) -> Result<()> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io_path("reading video metadata", path, e))?
            .len();
        if size > MAX_UPLOAD_BYTES {
            return Err(Error::Other(format!(
                "video is {} bytes, above the {} byte upload limit",
                size, MAX_UPLOAD_BYTES
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::io_path("reading video", path, e))?;

        self.call("sendVideo", |client, url| {
            let part = Part::bytes(bytes.clone())
                .file_name(VIDEO_FILE_NAME)
                .mime_str("video/mp4")?;
            let form = Form::new()
                .text("chat_id", chat_id.to_string())
                .text("supports_streaming", "true")
                .part("video", part);
            Ok(client.post(url).multipart(form))
        })
        .await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        let request_timeout = Duration::from_secs(timeout_secs + 10);
        let result = self
            .call("getUpdates", |client, url| {
                Ok(client.post(url).timeout(request_timeout).json(&payload))
            })
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn notify(&self, channel_id: i64, text: &str) -> Result<()> {
        self.send_message(channel_id, text).await
    }

    async fn deliver_video(&self, channel_id: i64, path: &Path) -> Result<()> {
        if let Err(e) = self.send_chat_action(channel_id, "upload_video").await {
            debug!(error = %e, "sendChatAction failed");
        }
        self.send_video(channel_id, path).await
    }
}

fn retry_delay(parameters: Option<&ResponseParameters>) -> Duration {
    parameters
        .and_then(|p| p.retry_after)
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}

/// Cut `text` to the message limit on a character boundary, marking the cut.
fn fit_message(text: &str) -> Cow<'_, str> {
    match text.char_indices().nth(MESSAGE_CHAR_LIMIT) {
        None => Cow::Borrowed(text),
        Some(_) => {
            let keep = MESSAGE_CHAR_LIMIT - CUT_MARKER.chars().count();
            let end = text.char_indices().nth(keep).map_or(text.len(), |(i, _)| i);
            Cow::Owned(format!("{}{CUT_MARKER}", &text[..end]))
        }
    }
}
