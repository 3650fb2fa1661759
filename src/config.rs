//! Centralized configuration
//!
//! Values come from the process environment, with a `.env` file loaded first
//! (environment variables always win over `.env` entries). All data paths are
//! derived from a single base directory.

use crate::error::ConfigError;
use crate::transcribe::retry::RetryPolicy;
use crate::transcribe::types::{ModelConfig, TranscriptionMode};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CRACKED_MODELS: [&str; 3] = [
    "gpt-4o",
    "anthropic/claude-3-5-sonnet:beta",
    "qwen/qwen2.5-vl-32b-instruct",
];

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Tablet address
    pub host: String,
    /// SSH user on the tablet
    pub user: String,
    /// Document store location on the tablet
    pub remote_path: String,
    /// Everything local lives under here
    pub base_dir: PathBuf,

    /// API key for the OpenAI-compatible endpoint
    pub openai_api_key: Option<String>,
    /// Alternate endpoint (e.g. OpenRouter)
    pub openai_base_url: Option<String>,
    /// Model used in single-model mode
    pub openai_model: String,
    /// Model used for single-mode retries, `None` to retry the same model
    pub openai_fallback_model: Option<String>,
    /// Attempts per model call, including the first
    pub max_attempts: u32,
    /// Timeout for one model call
    pub call_timeout: Duration,
    /// Wall-clock bound for one page across all retries and the merge
    pub page_timeout: Duration,
    /// Client-side request budget per model per minute
    pub rate_limit_per_minute: usize,

    /// Multi-model transcription with merge
    pub cracked_mode: bool,
    pub cracked_models: Vec<String>,
    pub cracked_merge_model: String,

    /// Pages transcribed concurrently
    pub workers: usize,
    /// Keep trashed documents in the catalog
    pub include_trash: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "10.11.99.1".to_string(),
            user: "root".to_string(),
            remote_path: "/home/root/.local/share/remarkable/xochitl/".to_string(),
            base_dir: default_base_dir(),
            openai_api_key: None,
            openai_base_url: None,
            openai_model: "gpt-4o".to_string(),
            openai_fallback_model: Some("gpt-4o".to_string()),
            max_attempts: 5,
            call_timeout: Duration::from_secs(90),
            page_timeout: Duration::from_secs(600),
            rate_limit_per_minute: 60,
            cracked_mode: false,
            cracked_models: DEFAULT_CRACKED_MODELS.iter().map(|m| m.to_string()).collect(),
            cracked_merge_model: "gpt-4o".to_string(),
            workers: 3,
            include_trash: false,
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reM3")
}

impl Config {
    /// Load configuration from `.env` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        // Current directory first, then the configured base dir
        if dotenvy::dotenv().is_err() {
            if let Ok(base) = std::env::var("RM_BASE_DIR") {
                let _ = dotenvy::from_path(Path::new(&base).join(".env"));
            }
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("RM_HOST") {
            config.host = host;
        }
        if let Some(user) = get("RM_USER") {
            config.user = user;
        }
        if let Some(remote) = get("RM_REMOTE_PATH") {
            config.remote_path = remote;
        }
        if let Some(base) = get("RM_BASE_DIR") {
            config.base_dir = expand_home(&base)?;
        }

        config.openai_api_key = get("OPENAI_API_KEY");
        config.openai_base_url = get("OPENAI_BASE_URL");
        if let Some(model) = get("OPENAI_MODEL") {
            config.openai_model = model;
        }
        if let Some(model) = get("OPENAI_FALLBACK_MODEL") {
            config.openai_fallback_model = match model.trim().to_lowercase().as_str() {
                "none" | "off" => None,
                _ => Some(model),
            };
        }
        if let Some(v) = get("OPENAI_MAX_RETRIES") {
            config.max_attempts = parse_positive_as("OPENAI_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RM_CALL_TIMEOUT_SECS") {
            config.call_timeout = Duration::from_secs(parse_positive("RM_CALL_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("RM_PAGE_TIMEOUT_SECS") {
            config.page_timeout = Duration::from_secs(parse_positive("RM_PAGE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("RM_RATE_LIMIT_PER_MINUTE") {
            config.rate_limit_per_minute = parse_positive_as("RM_RATE_LIMIT_PER_MINUTE", &v)?;
        }

        if let Some(v) = get("CRACKED_MODE") {
            config.cracked_mode = parse_bool(&v);
        }
        if let Some(v) = get("CRACKED_MODELS") {
            let models: Vec<String> = v
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if models.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "CRACKED_MODELS",
                    value: v,
                    reason: "expected a comma-separated list of model ids".to_string(),
                });
            }
            config.cracked_models = models;
        }
        if let Some(model) = get("CRACKED_MERGE_MODEL") {
            config.cracked_merge_model = model;
        }

        if let Some(v) = get("RM_WORKERS") {
            config.workers = parse_positive_as("RM_WORKERS", &v)?;
        }
        if let Some(v) = get("RM_INCLUDE_TRASH") {
            config.include_trash = parse_bool(&v);
        }

        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Local mirror of the tablet's document store
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir().join("raw")
    }

    /// Pre-rendered page images
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir().join("images")
    }

    pub fn text_dir(&self) -> PathBuf {
        self.data_dir().join("text")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.data_dir().join("manifest.json")
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.data_dir().join("catalog.json")
    }

    /// Create all local directories
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [self.data_dir(), self.raw_dir(), self.images_dir(), self.text_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Orchestrator mode derived from the cracked-mode switches
    pub fn transcription_mode(&self) -> TranscriptionMode {
        if self.cracked_mode {
            TranscriptionMode::Cracked {
                models: self.cracked_models.iter().map(ModelConfig::new).collect(),
                merge_model: ModelConfig::new(&self.cracked_merge_model),
            }
        } else {
            TranscriptionMode::Single(ModelConfig::new(&self.openai_model))
        }
    }

    /// Single-mode retry model, unless it is the configured model anyway
    pub fn fallback_model(&self) -> Option<ModelConfig> {
        self.openai_fallback_model
            .as_deref()
            .filter(|m| *m != self.openai_model)
            .map(ModelConfig::new)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn expand_home(raw: &str) -> Result<PathBuf, ConfigError> {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(ConfigError::NoBaseDir)?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(raw))
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Positive integer that must also fit the target type
fn parse_positive_as<T: TryFrom<u64>>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    let n = parse_positive(key, value)?;
    T::try_from(n).map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: "out of range".to_string(),
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
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
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.host, "10.11.99.1");
        assert_eq!(config.workers, 3);
        assert_eq!(config.max_attempts, 5);
        assert!(!config.cracked_mode);
        assert_eq!(config.cracked_models.len(), 3);
        assert!(matches!(config.transcription_mode(), TranscriptionMode::Single(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("RM_BASE_DIR", "/tmp/rem3"),
            ("RM_WORKERS", "8"),
            ("CRACKED_MODE", "yes"),
            ("CRACKED_MODELS", "gpt-4o, qwen/qwen2.5-vl-7b-instruct ,"),
            ("CRACKED_MERGE_MODEL", "gpt-4o-mini"),
        ]))
        .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.manifest_file(), PathBuf::from("/tmp/rem3/data/manifest.json"));
        match config.transcription_mode() {
            TranscriptionMode::Cracked { models, merge_model } => {
                assert_eq!(models.len(), 2);
                assert_eq!(models[1].id, "qwen/qwen2.5-vl-7b-instruct");
                assert_eq!(merge_model.id, "gpt-4o-mini");
            }
            other => panic!("expected cracked mode, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[("RM_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "RM_WORKERS", .. }));

        let err = Config::from_lookup(lookup(&[("OPENAI_MAX_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_out_of_range_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[("OPENAI_MAX_RETRIES", "4294967297")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "OPENAI_MAX_RETRIES", .. }));

        let config = Config::from_lookup(lookup(&[("OPENAI_MAX_RETRIES", "4294967295")])).unwrap();
        assert_eq!(config.max_attempts, u32::MAX);
    }

    #[test]
    fn test_fallback_model() {
        let config = Config::from_lookup(lookup(&[("OPENAI_MODEL", "gpt-4o-mini")])).unwrap();
        assert_eq!(config.fallback_model().map(|m| m.id), Some("gpt-4o".to_string()));

        // Same as the configured model: nothing to fall back to
        let config = Config::from_lookup(|_| None).unwrap();
        assert!(config.fallback_model().is_none());

        let config = Config::from_lookup(lookup(&[
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("OPENAI_FALLBACK_MODEL", "none"),
        ]))
        .unwrap();
        assert!(config.fallback_model().is_none());
    }

    #[test]
    fn test_retry_policy_uses_max_attempts() {
        let config = Config::from_lookup(lookup(&[("OPENAI_MAX_RETRIES", "2")])).unwrap();
        assert_eq!(config.retry_policy().max_attempts, 2);
    }
}
