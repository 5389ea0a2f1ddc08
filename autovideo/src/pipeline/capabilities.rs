//! Stage set resolved once from configuration.

use std::sync::Arc;

use tracing::info;

use super::stages::{AssemblyStage, NarrationStage, ScriptStage, VisualsStage};
use super::traits::{AssetProvider, PremiumSynthesizer, ScriptGenerator};
use crate::config::{
    AppConfig, AssetProviderConfig, PremiumNarrationConfig, ScriptProviderConfig,
};
use crate::media::{FfmpegAssembler, PlaceholderRenderer};
use crate::providers::{
    ElevenLabsSynthesizer, GoogleTtsSynthesizer, OpenAiScriptGenerator, StabilityAssetProvider,
};

/// The four stages, each with its primary capability already chosen.
pub struct Capabilities {
    pub script: ScriptStage,
    pub visuals: VisualsStage,
    pub narration: NarrationStage,
    pub assembly: AssemblyStage,
}

impl Capabilities {
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Self {
        let script: Option<Arc<dyn ScriptGenerator>> = match &config.script {
            ScriptProviderConfig::Local => None,
            ScriptProviderConfig::OpenAi {
                api_key,
                model,
                base_url,
                timeout_secs,
            } => Some(Arc::new(OpenAiScriptGenerator::new(
                client.clone(),
                api_key,
                model,
                base_url,
                *timeout_secs,
            ))),
        };

        let assets: Option<Arc<dyn AssetProvider>> = match &config.assets {
            AssetProviderConfig::None => None,
            AssetProviderConfig::Stability { api_key } => Some(Arc::new(
                StabilityAssetProvider::new(client.clone(), api_key, config.video.orientation),
            )),
        };

        let premium: Option<Arc<dyn PremiumSynthesizer>> = match &config.premium_narration {
            PremiumNarrationConfig::None => None,
            PremiumNarrationConfig::ElevenLabs { api_key, voice } => Some(Arc::new(
                ElevenLabsSynthesizer::new(client.clone(), api_key, voice),
            )),
        };

        info!(
            script = script.as_ref().map(|s| s.name()).unwrap_or("template"),
            visuals = assets.as_ref().map(|a| a.name()).unwrap_or("placeholder"),
            narration = premium.as_ref().map(|p| p.name()).unwrap_or("baseline"),
            orientation = %config.video.orientation,
            "Pipeline capabilities resolved"
        );

        let renderer = PlaceholderRenderer::new(
            config.video.orientation,
            config.video.font_path.as_deref(),
        );

        Self {
            script: ScriptStage::new(script),
            visuals: VisualsStage::new(assets, renderer),
            narration: NarrationStage::new(
                premium,
                Arc::new(GoogleTtsSynthesizer::new(client)),
                config.narration_language.clone(),
            ),
            assembly: AssemblyStage::new(
                Arc::new(FfmpegAssembler::new(&config.video)),
                config.video.orientation,
            ),
        }
    }
}
