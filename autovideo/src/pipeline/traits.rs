//! Capability contracts consumed by the pipeline stages.
//!
//! Each stage owns one primary capability (optional) and a fallback. The
//! concrete HTTP providers live in `crate::providers`, ffmpeg in
//! `crate::media`; tests plug in in-process fakes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::config::Orientation;

/// Model-based script text generation.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Narrative text for `prompt` lasting roughly `duration_secs`.
    ///
    /// Fails with `GenerationUnavailable` or `GenerationTimeout`.
    async fn generate(&self, prompt: &str, duration_secs: u32) -> Result<String>;
}

/// External image/video asset source.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Up to `count` asset files written under `dest`. May return fewer.
    async fn search_or_generate(
        &self,
        prompt: &str,
        count: usize,
        dest: &Path,
    ) -> Result<Vec<PathBuf>>;
}

/// Optional high quality narration. `Ok(None)` means the capability declined.
#[async_trait]
pub trait PremiumSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize(&self, text: &str, dest: &Path) -> Result<Option<PathBuf>>;
}

/// Baseline text-to-speech, the reliability floor of the narration stage.
#[async_trait]
pub trait BaselineSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize(&self, text: &str, language: &str, dest: &Path) -> Result<PathBuf>;
}

/// Muxes ordered visuals and one narration track into a single video.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Write the muxed video to `output`. Fails with `Error::Assembly`.
    async fn mux(
        &self,
        assets: &[PathBuf],
        audio: &Path,
        orientation: Orientation,
        output: &Path,
    ) -> Result<PathBuf>;
}
