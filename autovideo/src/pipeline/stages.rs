//! The four pipeline stages.
//!
//! Every stage but assembly owns a fallback. Primary failures are logged and
//! absorbed here; only a failure that also defeats the fallback leaves a stage,
//! as `Error::StageFailed`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::StageKind;
use super::template;
use super::traits::{
    Assembler, AssetProvider, BaselineSynthesizer, PremiumSynthesizer, ScriptGenerator,
};
use crate::config::Orientation;
use crate::media::PlaceholderRenderer;
use crate::{Error, Result};

const MIN_VISUALS: u32 = 3;
const MAX_VISUALS: u32 = 10;
const SECS_PER_VISUAL: u32 = 6;

/// Number of visuals for a video of `duration_secs`: `clamp(ceil(d / 6), 3, 10)`.
pub fn desired_visual_count(duration_secs: u32) -> usize {
    duration_secs
        .div_ceil(SECS_PER_VISUAL)
        .clamp(MIN_VISUALS, MAX_VISUALS) as usize
}

/// Repeat `assets` in order until there are exactly `count` of them.
fn fill_to_count(assets: &[PathBuf], count: usize) -> Vec<PathBuf> {
    assets.iter().cycle().take(count).cloned().collect()
}

/// Script stage. Falls back to the local template, which cannot fail.
pub struct ScriptStage {
    primary: Option<Arc<dyn ScriptGenerator>>,
}

impl ScriptStage {
    pub fn new(primary: Option<Arc<dyn ScriptGenerator>>) -> Self {
        Self { primary }
    }

    pub async fn run(&self, job_id: &str, prompt: &str, duration_secs: u32) -> String {
        if let Some(generator) = &self.primary {
            match generator.generate(prompt, duration_secs).await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(job_id, provider = generator.name(), "Script generated");
                    return text;
                }
                Ok(_) => warn!(
                    job_id,
                    provider = generator.name(),
                    "Empty script from provider, using local template"
                ),
                Err(e) => warn!(
                    job_id,
                    provider = generator.name(),
                    error = %e,
                    "Script generation failed, using local template"
                ),
            }
        }

        debug!(job_id, duration_secs, "Rendering local script template");
        template::render_script(prompt, duration_secs)
    }
}

/// Visuals stage. Falls back to placeholder frames rendered from the script.
pub struct VisualsStage {
    primary: Option<Arc<dyn AssetProvider>>,
    fallback: PlaceholderRenderer,
}

impl VisualsStage {
    pub fn new(primary: Option<Arc<dyn AssetProvider>>, fallback: PlaceholderRenderer) -> Self {
        Self { primary, fallback }
    }

    /// Exactly `count` ordered visuals, written under `workspace`.
    pub async fn run(
        &self,
        job_id: &str,
        prompt: &str,
        script: &str,
        count: usize,
        workspace: &Path,
    ) -> Result<Vec<PathBuf>> {
        if let Some(provider) = &self.primary {
            match provider
                .search_or_generate(prompt, count, &workspace.join("assets"))
                .await
            {
                Ok(assets) if !assets.is_empty() => {
                    info!(
                        job_id,
                        provider = provider.name(),
                        received = assets.len(),
                        count,
                        "Visual assets ready"
                    );
                    return Ok(fill_to_count(&assets, count));
                }
                Ok(_) => warn!(
                    job_id,
                    provider = provider.name(),
                    "Asset provider returned nothing, rendering placeholder frames"
                ),
                Err(e) => warn!(
                    job_id,
                    provider = provider.name(),
                    error = %e,
                    "Asset provider failed, rendering placeholder frames"
                ),
            }
        }

        let frames = self
            .fallback
            .render(script, count, &workspace.join("frames"))
            .await
            .map_err(|e| Error::stage(StageKind::Visuals, e))?;
        info!(job_id, count = frames.len(), "Placeholder frames rendered");
        Ok(frames)
    }
}

/// Narration stage. Premium synthesis if configured, else the baseline.
pub struct NarrationStage {
    premium: Option<Arc<dyn PremiumSynthesizer>>,
    baseline: Arc<dyn BaselineSynthesizer>,
    language: String,
}

impl NarrationStage {
    pub fn new(
        premium: Option<Arc<dyn PremiumSynthesizer>>,
        baseline: Arc<dyn BaselineSynthesizer>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            premium,
            baseline,
            language: language.into(),
        }
    }

    pub async fn run(&self, job_id: &str, text: &str, workspace: &Path) -> Result<PathBuf> {
        if let Some(premium) = &self.premium {
            match premium.synthesize(text, workspace).await {
                Ok(Some(path)) => {
                    info!(job_id, provider = premium.name(), "Narration synthesized");
                    return Ok(path);
                }
                Ok(None) => warn!(
                    job_id,
                    provider = premium.name(),
                    "Premium narration declined, using baseline"
                ),
                Err(e) => warn!(
                    job_id,
                    provider = premium.name(),
                    error = %e,
                    "Premium narration failed, using baseline"
                ),
            }
        }

        let path = self
            .baseline
            .synthesize(text, &self.language, workspace)
            .await
            .map_err(|e| Error::stage(StageKind::Narration, e))?;
        info!(job_id, provider = self.baseline.name(), "Baseline narration synthesized");
        Ok(path)
    }
}

/// Assembly stage. No fallback.
pub struct AssemblyStage {
    assembler: Arc<dyn Assembler>,
    orientation: Orientation,
}

impl AssemblyStage {
    pub fn new(assembler: Arc<dyn Assembler>, orientation: Orientation) -> Self {
        Self {
            assembler,
            orientation,
        }
    }

    pub async fn run(
        &self,
        job_id: &str,
        visuals: &[PathBuf],
        audio: &Path,
        output: &Path,
    ) -> Result<PathBuf> {
        let path = self
            .assembler
            .mux(visuals, audio, self.orientation, output)
            .await
            .map_err(|e| Error::stage(StageKind::Assembly, e))?;
        info!(job_id, output = %path.display(), "Assembly finished");
        Ok(path)
    }
}
