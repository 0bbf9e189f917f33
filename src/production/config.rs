//! Production configuration.
//!
//! One [`ProductionConfig`] is built at startup and shared by every
//! component of a run. It can be assembled from defaults and builder
//! methods, from `SCENE_FORGE_*` environment variables, or from a YAML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::pool::DEFAULT_RENDER_CONCURRENCY;
use super::retry::{default_feedback_rules, FeedbackRule, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::provider::ProviderSettings;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for a production run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    // Concurrency
    /// Number of renders allowed to run at once.
    pub render_concurrency: usize,
    /// Cap on scene workers; `None` runs one worker per scene.
    pub max_parallel_scenes: Option<usize>,

    // Retries
    /// Total attempts per scene, first attempt included.
    pub max_attempts: u32,
    /// Ordered error categories and their corrective hints.
    pub feedback_rules: Vec<FeedbackRule>,

    // Timeouts
    /// Upper bound for a single provider call.
    #[serde(with = "duration_secs")]
    pub provider_timeout: Duration,
    /// Upper bound for waiting on a render permit.
    #[serde(with = "opt_duration_secs")]
    pub permit_timeout: Option<Duration>,

    // Project policy
    /// Marks the project `Error` when any scene fails.
    pub fail_on_scene_error: bool,
    pub default_target_duration_seconds: f64,

    /// How often the progress monitor logs.
    #[serde(with = "duration_secs")]
    pub progress_interval: Duration,

    pub provider: ProviderSettings,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            render_concurrency: DEFAULT_RENDER_CONCURRENCY,
            max_parallel_scenes: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            feedback_rules: default_feedback_rules(),
            provider_timeout: Duration::from_secs(600), // 10 minutes
            permit_timeout: None,
            fail_on_scene_error: false,
            default_target_duration_seconds: 60.0,
            progress_interval: Duration::from_secs(15),
            provider: ProviderSettings::default(),
        }
    }
}

impl ProductionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SCENE_FORGE_RENDER_CONCURRENCY`: Concurrent renders (default: 3)
    /// - `SCENE_FORGE_MAX_PARALLEL_SCENES`: Scene worker cap (default: one per scene)
    /// - `SCENE_FORGE_MAX_ATTEMPTS`: Attempts per scene (default: 3)
    /// - `SCENE_FORGE_PROVIDER_TIMEOUT_SECS`: Provider call timeout (default: 600)
    /// - `SCENE_FORGE_PERMIT_TIMEOUT_SECS`: Render permit wait limit (default: none)
    /// - `SCENE_FORGE_FAIL_ON_SCENE_ERROR`: Fail the project on any scene error (default: false)
    /// - `SCENE_FORGE_DEFAULT_DURATION_SECS`: Default target duration (default: 60)
    /// - `SCENE_FORGE_PROGRESS_INTERVAL_SECS`: Progress log interval (default: 15)
    /// - `SCENE_FORGE_STORAGE_DIR`: Asset and media directory (default: storage)
    /// - `SCENE_FORGE_MANIM_BINARY`: Renderer executable (default: manim)
    /// - `SCENE_FORGE_PLANNING_MODEL` / `SCENE_FORGE_CONTENT_MODEL` / `SCENE_FORGE_IMAGE_MODEL`
    /// - `OPENAI_API_KEY`: API key for the LLM and image endpoints
    /// - `OPENAI_API_BASE`: OpenAI-compatible base URL
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `SCENE_FORGE_*` and `OPENAI_*` variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("SCENE_FORGE_RENDER_CONCURRENCY") {
            self.render_concurrency = parse_env_value(&val, "SCENE_FORGE_RENDER_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_MAX_PARALLEL_SCENES") {
            self.max_parallel_scenes =
                Some(parse_env_value(&val, "SCENE_FORGE_MAX_PARALLEL_SCENES")?);
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_MAX_ATTEMPTS") {
            self.max_attempts = parse_env_value(&val, "SCENE_FORGE_MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_PROVIDER_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SCENE_FORGE_PROVIDER_TIMEOUT_SECS")?;
            self.provider_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_PERMIT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SCENE_FORGE_PERMIT_TIMEOUT_SECS")?;
            self.permit_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_FAIL_ON_SCENE_ERROR") {
            self.fail_on_scene_error = parse_env_bool(&val, "SCENE_FORGE_FAIL_ON_SCENE_ERROR")?;
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_DEFAULT_DURATION_SECS") {
            self.default_target_duration_seconds =
                parse_env_value(&val, "SCENE_FORGE_DEFAULT_DURATION_SECS")?;
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_PROGRESS_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "SCENE_FORGE_PROGRESS_INTERVAL_SECS")?;
            self.progress_interval = Duration::from_secs(secs);
        }

        // Provider settings
        if let Ok(val) = std::env::var("SCENE_FORGE_STORAGE_DIR") {
            self.provider.storage_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_MANIM_BINARY") {
            self.provider.manim_binary = val;
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_PLANNING_MODEL") {
            self.provider.planning_model = val;
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_CONTENT_MODEL") {
            self.provider.content_model = val;
        }

        if let Ok(val) = std::env::var("SCENE_FORGE_IMAGE_MODEL") {
            self.provider.image_model = val;
        }

        if let Ok(val) = std::env::var("OPENAI_API_KEY") {
            if !val.trim().is_empty() {
                self.provider.api_key = Some(val);
            }
        }

        if let Ok(val) = std::env::var("OPENAI_API_BASE") {
            self.provider.api_base = val;
        }

        Ok(())
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "render_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_parallel_scenes == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_parallel_scenes must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.provider_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "provider_timeout must be greater than 0".to_string(),
            ));
        }

        if self.permit_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "permit_timeout must be greater than 0".to_string(),
            ));
        }

        if !(self.default_target_duration_seconds > 0.0) {
            return Err(ConfigError::ValidationFailed(
                "default_target_duration_seconds must be positive".to_string(),
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Retry policy built from `max_attempts` and `feedback_rules`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.feedback_rules.clone())
    }

    /// Copy safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        Self {
            provider: self.provider.redacted(),
            ..self.clone()
        }
    }

    pub fn with_render_concurrency(mut self, capacity: usize) -> Self {
        self.render_concurrency = capacity;
        self
    }

    pub fn with_max_parallel_scenes(mut self, workers: usize) -> Self {
        self.max_parallel_scenes = Some(workers);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_feedback_rules(mut self, rules: Vec<FeedbackRule>) -> Self {
        self.feedback_rules = rules;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_permit_timeout(mut self, timeout: Duration) -> Self {
        self.permit_timeout = Some(timeout);
        self
    }

    pub fn with_fail_on_scene_error(mut self, fail: bool) -> Self {
        self.fail_on_scene_error = fail;
        self
    }

    pub fn with_default_target_duration(mut self, seconds: f64) -> Self {
        self.default_target_duration_seconds = seconds;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_provider(mut self, provider: ProviderSettings) -> Self {
        self.provider = provider;
        self
    }
}

/// Parses an environment variable value into the specified type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Parses an environment variable value as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProductionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render_concurrency, 3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.provider_timeout, Duration::from_secs(600));
        assert!(!config.fail_on_scene_error);
        assert_eq!(config.retry_policy().max_attempts(), 3);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let zero_capacity = ProductionConfig::new().with_render_concurrency(0);
        assert!(matches!(
            zero_capacity.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));

        let zero_attempts = ProductionConfig::new().with_max_attempts(0);
        assert!(zero_attempts.validate().is_err());

        let zero_timeout = ProductionConfig::new().with_provider_timeout(Duration::ZERO);
        assert!(zero_timeout.validate().is_err());

        let bad_duration = ProductionConfig::new().with_default_target_duration(0.0);
        assert!(bad_duration.validate().is_err());

        let nan_duration = ProductionConfig::new().with_default_target_duration(f64::NAN);
        assert!(nan_duration.validate().is_err());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "render_concurrency: 2\nprovider_timeout: 30\npermit_timeout: 5.5\nfail_on_scene_error: true\nprovider:\n  manim_binary: /opt/manim\n"
        )
        .unwrap();

        let config = ProductionConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.render_concurrency, 2);
        assert_eq!(config.provider_timeout, Duration::from_secs(30));
        assert_eq!(config.permit_timeout, Some(Duration::from_millis(5500)));
        assert!(config.fail_on_scene_error);
        assert_eq!(config.provider.manim_binary, "/opt/manim");
        assert_eq!(config.provider.content_model, "gpt-4o");
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_yaml_validation_applies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_attempts: 0").unwrap();
        assert!(matches!(
            ProductionConfig::from_yaml_file(file.path()),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_yaml_round_trip_keeps_rules() {
        let config = ProductionConfig::default().with_permit_timeout(Duration::from_secs(2));
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ProductionConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_redacted_masks_key() {
        let config = ProductionConfig::default()
            .with_provider(ProviderSettings::default().with_api_key("sk-secret"));
        let yaml = serde_yaml::to_string(&config.redacted()).unwrap();
        assert!(!yaml.contains("sk-secret"));
        assert!(yaml.contains("***"));
    }

    #[test]
    fn test_parse_env_helpers() {
        assert_eq!(parse_env_value::<usize>(" 4 ", "K").unwrap(), 4);
        assert!(matches!(
            parse_env_value::<usize>("four", "K"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(parse_env_bool("Yes", "B").unwrap());
        assert!(!parse_env_bool("off", "B").unwrap());
        assert!(parse_env_bool("maybe", "B").is_err());
    }
}
