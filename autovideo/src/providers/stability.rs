//! Frame generation through the Stability AI image API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::Form;
use tracing::{debug, warn};

use crate::config::Orientation;
use crate::pipeline::traits::AssetProvider;
use crate::{Error, Result};

const ENDPOINT: &str = "https://api.stability.ai/v2beta/stable-image/generate/core";

pub struct StabilityAssetProvider {
    client: Client,
    api_key: String,
    orientation: Orientation,
}

impl StabilityAssetProvider {
    pub fn new(client: Client, api_key: impl Into<String>, orientation: Orientation) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            orientation,
        }
    }

    async fn generate_one(&self, prompt: &str) -> Result<Vec<u8>> {
        let form = Form::new()
            .text("prompt", prompt.to_string())
            .text("aspect_ratio", self.orientation.aspect_ratio())
            .text("output_format", "png");

        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "image/*")
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!(
                "Stability request failed: {} - {}",
                status, body
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Prompt for frame `index` (1-based) of `count`.
fn frame_prompt(prompt: &str, index: usize, count: usize) -> String {
    format!("{prompt}, illustration, scene {index} of {count}")
}

#[async_trait]
impl AssetProvider for StabilityAssetProvider {
    fn name(&self) -> &'static str {
        "stability"
    }

    async fn search_or_generate(
        &self,
        prompt: &str,
        count: usize,
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| Error::io_path("creating asset directory", dest, e))?;

        let mut assets = Vec::with_capacity(count);
        for index in 1..=count {
            match self.generate_one(&frame_prompt(prompt, index, count)).await {
                Ok(bytes) => {
                    let path = dest.join(format!("asset_{index:03}.png"));
                    tokio::fs::write(&path, bytes)
                        .await
                        .map_err(|e| Error::io_path("writing asset", &path, e))?;
                    assets.push(path);
                }
                // Nothing usable yet: let the stage fall back.
                Err(e) if assets.is_empty() => return Err(e),
                Err(e) => {
                    warn!(error = %e, generated = assets.len(), "Stopping image generation early");
                    break;
                }
            }
        }

        debug!(count = assets.len(), "Generated frames");
        Ok(assets)
    }
}
