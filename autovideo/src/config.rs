//! Application configuration loaded from the environment.
//!
//! Optional capabilities (script model, image provider, premium narration) are
//! resolved here once into tagged variants. Nothing downstream re-reads the
//! environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Smallest target duration the script template can split into five beats.
pub const MIN_SUPPORTED_DURATION_SECS: u32 = 10;

const DEFAULT_DATABASE_URL: &str = "sqlite:autovideo.db?mode=rwc";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

/// What happens when an owner has used up the free quota.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPolicy {
    /// Reject the submission.
    Block,
    /// Accept the submission and report a warning to the caller.
    Warn,
}

/// Video orientation preset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    /// Output resolution `(width, height)` for this preset.
    pub fn resolution(self) -> (u32, u32) {
        match self {
            Self::Landscape => (1280, 720),
            Self::Portrait => (720, 1280),
        }
    }

    /// Aspect ratio string understood by image generation APIs.
    pub fn aspect_ratio(self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }
}

/// Valid range for requested durations, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationLimits {
    pub min_secs: u32,
    pub max_secs: u32,
    pub default_secs: u32,
}

impl Default for DurationLimits {
    fn default() -> Self {
        Self {
            min_secs: MIN_SUPPORTED_DURATION_SECS,
            max_secs: 8 * 60,
            default_secs: 60,
        }
    }
}

impl DurationLimits {
    /// Clamp a requested duration into the configured range.
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_secs)
            .clamp(self.min_secs, self.max_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.min_secs < MIN_SUPPORTED_DURATION_SECS {
            return Err(Error::config(format!(
                "MIN_DURATION_SECS must be at least {MIN_SUPPORTED_DURATION_SECS}"
            )));
        }
        if !(self.min_secs <= self.default_secs && self.default_secs <= self.max_secs) {
            return Err(Error::config(format!(
                "duration limits must satisfy min <= default <= max (got {}/{}/{})",
                self.min_secs, self.default_secs, self.max_secs
            )));
        }
        Ok(())
    }
}

/// Fixed encoding and rendering parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    pub orientation: Orientation,
    pub fps: u32,
    pub audio_codec: String,
    pub font_path: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            orientation: Orientation::Landscape,
            fps: 24,
            audio_codec: "aac".to_string(),
            font_path: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

/// Script generation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptProviderConfig {
    /// Only the local template generator.
    Local,
    /// OpenAI-compatible chat completions endpoint.
    OpenAi {
        api_key: String,
        model: String,
        base_url: String,
        timeout_secs: u64,
    },
}

/// Visual asset capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetProviderConfig {
    /// Placeholder frames only.
    None,
    /// Stability AI image generation.
    Stability { api_key: String },
}

/// Premium narration capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PremiumNarrationConfig {
    None,
    ElevenLabs { api_key: String, voice: String },
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Jobs processed concurrently.
    pub max_workers: usize,
    /// Jobs waiting for a worker before submissions are rejected.
    pub queue_capacity: usize,
    /// Upper bound for one job, in seconds.
    pub job_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            queue_capacity: 64,
            job_timeout_secs: 30 * 60,
        }
    }
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub telegram_token: Option<String>,
    pub database_url: String,
    pub log_dir: String,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub free_jobs_per_user: i64,
    pub quota_policy: QuotaPolicy,
    pub durations: DurationLimits,
    pub video: VideoSettings,
    pub narration_language: String,
    pub script: ScriptProviderConfig,
    pub assets: AssetProviderConfig,
    pub premium_narration: PremiumNarrationConfig,
    pub workers: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: "logs".to_string(),
            work_dir: std::env::temp_dir(),
            output_dir: PathBuf::from("output"),
            free_jobs_per_user: 3,
            quota_policy: QuotaPolicy::Block,
            durations: DurationLimits::default(),
            video: VideoSettings::default(),
            narration_language: "en".to_string(),
            script: ScriptProviderConfig::Local,
            assets: AssetProviderConfig::None,
            premium_narration: PremiumNarrationConfig::None,
            workers: WorkerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let script = match get("OPENAI_API_KEY") {
            Some(api_key) => ScriptProviderConfig::OpenAi {
                api_key,
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                base_url: get("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                timeout_secs: parse_or(&get, "SCRIPT_TIMEOUT_SECS", 60)?,
            },
            None => ScriptProviderConfig::Local,
        };

        let assets = match get("STABILITY_API_KEY") {
            Some(api_key) => AssetProviderConfig::Stability { api_key },
            None => AssetProviderConfig::None,
        };

        let premium_narration = match get("ELEVENLABS_API_KEY") {
            Some(api_key) => PremiumNarrationConfig::ElevenLabs {
                api_key,
                voice: get("ELEVENLABS_VOICE").unwrap_or_else(|| "alloy".to_string()),
            },
            None => PremiumNarrationConfig::None,
        };

        let config = Self {
            telegram_token: get("TELEGRAM_TOKEN"),
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            log_dir: get("LOG_DIR").unwrap_or(defaults.log_dir),
            work_dir: get("WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            free_jobs_per_user: parse_or(&get, "FREE_JOBS_PER_USER", defaults.free_jobs_per_user)?,
            quota_policy: parse_or(&get, "QUOTA_POLICY", defaults.quota_policy)?,
            durations: DurationLimits {
                min_secs: parse_or(&get, "MIN_DURATION_SECS", defaults.durations.min_secs)?,
                max_secs: parse_or(&get, "MAX_DURATION_SECS", defaults.durations.max_secs)?,
                default_secs: parse_or(
                    &get,
                    "DEFAULT_DURATION_SECS",
                    defaults.durations.default_secs,
                )?,
            },
            video: VideoSettings {
                orientation: parse_or(&get, "VIDEO_ORIENTATION", defaults.video.orientation)?,
                fps: parse_or(&get, "FPS", defaults.video.fps)?,
                audio_codec: get("AUDIO_CODEC").unwrap_or(defaults.video.audio_codec),
                font_path: get("FONT_PATH").map(PathBuf::from),
                ffmpeg_path: get("FFMPEG_PATH").unwrap_or(defaults.video.ffmpeg_path),
                ffprobe_path: get("FFPROBE_PATH").unwrap_or(defaults.video.ffprobe_path),
            },
            narration_language: get("NARRATION_LANGUAGE").unwrap_or(defaults.narration_language),
            script,
            assets,
            premium_narration,
            workers: WorkerConfig {
                max_workers: parse_or(&get, "MAX_CONCURRENT_JOBS", defaults.workers.max_workers)?,
                queue_capacity: parse_or(
                    &get,
                    "JOB_QUEUE_CAPACITY",
                    defaults.workers.queue_capacity,
                )?,
                job_timeout_secs: parse_or(
                    &get,
                    "JOB_TIMEOUT_SECS",
                    defaults.workers.job_timeout_secs,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        self.durations.validate()?;
        if self.free_jobs_per_user < 0 {
            return Err(Error::config("FREE_JOBS_PER_USER must not be negative"));
        }
        if self.workers.max_workers == 0 {
            return Err(Error::config("MAX_CONCURRENT_JOBS must be at least 1"));
        }
        if self.workers.queue_capacity == 0 {
            return Err(Error::config("JOB_QUEUE_CAPACITY must be at least 1"));
        }
        if self.video.fps == 0 {
            return Err(Error::config("FPS must be at least 1"));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| Error::config(format!("invalid value for {key} ({raw:?}): {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_resolve_to_local_capabilities() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert!(matches!(config.script, ScriptProviderConfig::Local));
        assert!(matches!(config.assets, AssetProviderConfig::None));
        assert!(matches!(
            config.premium_narration,
            PremiumNarrationConfig::None
        ));
        assert_eq!(config.quota_policy, QuotaPolicy::Block);
        assert_eq!(config.free_jobs_per_user, 3);
        assert_eq!(config.video.fps, 24);
    }

    #[test]
    fn test_keys_resolve_to_tagged_variants() {
        let config = AppConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("STABILITY_API_KEY", "st-test"),
            ("ELEVENLABS_API_KEY", "el-test"),
            ("ELEVENLABS_VOICE", "rachel"),
            ("QUOTA_POLICY", "WARN"),
            ("VIDEO_ORIENTATION", "portrait"),
        ]))
        .unwrap();

        match config.script {
            ScriptProviderConfig::OpenAi {
                model, timeout_secs, ..
            } => {
                assert_eq!(model, DEFAULT_OPENAI_MODEL);
                assert_eq!(timeout_secs, 60);
            }
            other => panic!("unexpected script config: {other:?}"),
        }
        assert!(matches!(config.assets, AssetProviderConfig::Stability { .. }));
        match config.premium_narration {
            PremiumNarrationConfig::ElevenLabs { voice, .. } => assert_eq!(voice, "rachel"),
            other => panic!("unexpected narration config: {other:?}"),
        }
        assert_eq!(config.quota_policy, QuotaPolicy::Warn);
        assert_eq!(config.video.orientation.resolution(), (720, 1280));
    }

    #[test]
    fn test_invalid_number_is_configuration_error() {
        let err = AppConfig::from_lookup(lookup(&[("FPS", "fast")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_duration_limits_must_be_ordered() {
        let err = AppConfig::from_lookup(lookup(&[
            ("MIN_DURATION_SECS", "30"),
            ("DEFAULT_DURATION_SECS", "20"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = AppConfig::from_lookup(lookup(&[("MIN_DURATION_SECS", "5")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_duration_clamp() {
        let limits = DurationLimits::default();
        assert_eq!(limits.clamp(None), 60);
        assert_eq!(limits.clamp(Some(1)), 10);
        assert_eq!(limits.clamp(Some(45)), 45);
        assert_eq!(limits.clamp(Some(10_000)), 480);
    }
}
