//! Premium narration through the ElevenLabs text-to-speech API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use crate::pipeline::traits::PremiumSynthesizer;
use crate::{Error, Result};

const BASE_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const STABILITY: f32 = 0.5;
const SIMILARITY_BOOST: f32 = 0.75;

pub struct ElevenLabsSynthesizer {
    client: Client,
    api_key: String,
    voice: String,
}

impl ElevenLabsSynthesizer {
    pub fn new(client: Client, api_key: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            voice: voice.into(),
        }
    }

    fn request_body(text: &str) -> serde_json::Value {
        json!({
            "text": text,
            "voice_settings": {
                "stability": STABILITY,
                "similarity_boost": SIMILARITY_BOOST,
            },
        })
    }
}

#[async_trait]
impl PremiumSynthesizer for ElevenLabsSynthesizer {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, dest: &Path) -> Result<Option<PathBuf>> {
        let url = format!("{}/{}", BASE_URL, self.voice);
        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&Self::request_body(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("ElevenLabs TTS failed: {} - {}", status, body);
            return Ok(None);
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Ok(None);
        }

        let path = dest.join("narration_premium.mp3");
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|e| Error::io_path("writing narration", &path, e))?;
        Ok(Some(path))
    }
}
