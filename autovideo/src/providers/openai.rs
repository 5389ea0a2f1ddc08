//! Script generation through an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::pipeline::traits::ScriptGenerator;
use crate::{Error, Result};

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 700;
const SYSTEM_PROMPT: &str = "You help write scripts for short videos. Split the script into \
                             numbered scenes and give an approximate duration for each scene.";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiScriptGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiScriptGenerator {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn request_body(&self, prompt: &str, duration_secs: u32) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Write a detailed script for a {duration_secs}-second video about: {prompt}. \
                         Split it into scenes with approximate durations."
                    ),
                },
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        })
    }

    async fn request(&self, prompt: &str, duration_secs: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, duration_secs))
            .send()
            .await
            .map_err(|e| Error::GenerationUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Chat completion failed: {} - {}", status, body);
            return Err(Error::GenerationUnavailable(format!("HTTP {}", status)));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::GenerationUnavailable(format!("malformed response: {}", e)))?;

        extract_content(body)
            .ok_or_else(|| Error::GenerationUnavailable("empty completion".to_string()))
    }
}

/// Trimmed text of the first choice, `None` when missing or blank.
fn extract_content(response: ChatCompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[async_trait]
impl ScriptGenerator for OpenAiScriptGenerator {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, prompt: &str, duration_secs: u32) -> Result<String> {
        debug!(model = %self.model, duration_secs, "Requesting script");
        match tokio::time::timeout(self.timeout, self.request(prompt, duration_secs)).await {
            Ok(result) => result,
            Err(_) => Err(Error::GenerationTimeout(self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> OpenAiScriptGenerator {
        OpenAiScriptGenerator::new(
            crate::utils::http_client::build_client(Duration::ZERO).unwrap(),
            "sk-test",
            "gpt-3.5-turbo",
            "https://api.example.com/v1/",
            5,
        )
    }

    #[test]
    fn test_request_body() {
        let body = generator().request_body("omelette", 45);
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["max_tokens"], 700);
        assert_eq!(body["messages"][0]["role"], "system");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("45-second"));
        assert!(user.contains("omelette"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(generator().base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_extract_content() {
        let parsed: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  Scene 1 \n"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(parsed).as_deref(), Some("Scene 1"));

        let blank: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"   "}}]}"#).unwrap();
        assert_eq!(extract_content(blank), None);

        let empty: ChatCompletionResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(extract_content(empty), None);
    }
}
