//! Baseline narration through the Google Translate TTS endpoint.
//!
//! The endpoint accepts at most 200 characters per request, so text is split
//! on word boundaries and the MP3 segments are concatenated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::pipeline::traits::BaselineSynthesizer;
use crate::{Error, Result};

const ENDPOINT: &str = "https://translate.google.com/translate_tts";
const MAX_SEGMENT_CHARS: usize = 200;
const MAX_ATTEMPTS: u32 = 3;

/// Split `text` into pieces of at most `max_chars` characters, breaking
/// between words. Words longer than `max_chars` are split mid-word.
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                segments.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed > max_chars {
            segments.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

pub struct GoogleTtsSynthesizer {
    client: Client,
}

impl GoogleTtsSynthesizer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_segment(
        &self,
        segment: &str,
        language: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>> {
        let idx = idx.to_string();
        let total = total.to_string();
        let textlen = segment.chars().count().to_string();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .client
                .get(ENDPOINT)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", language),
                    ("q", segment),
                    ("idx", idx.as_str()),
                    ("total", total.as_str()),
                    ("textlen", textlen.as_str()),
                ])
                .send()
                .await;

            let error = match result {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.bytes().await?.to_vec());
                }
                Ok(response) => Error::provider(format!("TTS segment failed: {}", response.status())),
                Err(e) => Error::from(e),
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(error);
            }
            warn!(attempt, error = %error, "TTS segment request failed, retrying");
            tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
        }
    }
}

#[async_trait]
impl BaselineSynthesizer for GoogleTtsSynthesizer {
    fn name(&self) -> &'static str {
        "google_tts"
    }

    async fn synthesize(&self, text: &str, language: &str, dest: &Path) -> Result<PathBuf> {
        let segments = split_for_tts(text, MAX_SEGMENT_CHARS);
        if segments.is_empty() {
            return Err(Error::provider("nothing to narrate"));
        }

        let mut audio = Vec::new();
        for (idx, segment) in segments.iter().enumerate() {
            audio.extend(
                self.fetch_segment(segment, language, idx, segments.len())
                    .await?,
            );
        }

        let path = dest.join("narration.mp3");
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|e| Error::io_path("writing narration", &path, e))?;

        debug!(segments = segments.len(), bytes = audio.len(), "Baseline narration written");
        Ok(path)
    }
}
