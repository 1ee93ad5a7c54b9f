//! Runtime configuration.
//!
//! Defaults come from `Default`; `from_env` overrides them from `FOLIO_*`
//! variables and validates the result. LLM credentials are read separately by
//! [`crate::llm::LiteLlmClient::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::{AssetKind, PipelineSettings, PregenerateSettings, StalenessPolicy};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the generation pipelines and their backends.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Storage settings
    /// SQLite connection URL.
    pub database_url: String,
    /// Directory generated images are written to.
    pub asset_dir: PathBuf,

    // Pipeline settings
    /// `Generating` records untouched for this long are presumed abandoned.
    pub stale_threshold: Duration,
    /// Upper bound on a single generator call.
    pub generation_timeout: Duration,
    /// How long shutdown waits for each worker.
    pub shutdown_timeout: Duration,
    /// Kinds that fall back on generator errors, not only on unavailability.
    pub fallback_on_error: Vec<AssetKind>,

    // Batch settings
    /// Interval between record-count polls during pre-generation.
    pub poll_interval: Duration,
    /// Polls without progress before a recovery sweep is triggered.
    pub stall_polls: u32,
    /// Maximum time a pre-generation run waits.
    pub pregenerate_timeout: Duration,

    // LLM settings
    /// Model used for recaps, quizzes and analyses.
    pub llm_model: String,
    /// Sampling temperature.
    pub llm_temperature: f64,
    /// Completion token limit.
    pub llm_max_tokens: u32,

    // Image settings
    /// Base URL of a txt2img backend; images use placeholders when unset.
    pub diffusion_url: Option<String>,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://folio.db".to_string(),
            asset_dir: PathBuf::from("./assets"),

            stale_threshold: Duration::from_secs(900), // 15 minutes
            generation_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            fallback_on_error: Vec::new(),

            poll_interval: Duration::from_millis(2000),
            stall_polls: 10,
            pregenerate_timeout: Duration::from_secs(3600),

            llm_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.7,
            llm_max_tokens: 2048,

            diffusion_url: None,
            image_width: 768,
            image_height: 768,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FOLIO_DATABASE_URL`: SQLite URL (default: sqlite://folio.db)
    /// - `FOLIO_ASSET_DIR`: Image output directory (default: ./assets)
    /// - `FOLIO_STALE_THRESHOLD_SECS`: Stale threshold (default: 900)
    /// - `FOLIO_GENERATION_TIMEOUT_SECS`: Generator timeout (default: 300)
    /// - `FOLIO_SHUTDOWN_TIMEOUT_SECS`: Worker shutdown timeout (default: 30)
    /// - `FOLIO_FALLBACK_ON_ERROR`: Comma-separated kinds, or `all`
    /// - `FOLIO_POLL_INTERVAL_MS`: Batch poll interval (default: 2000)
    /// - `FOLIO_STALL_POLLS`: Idle polls before a sweep (default: 10)
    /// - `FOLIO_PREGENERATE_TIMEOUT_SECS`: Batch wait limit (default: 3600)
    /// - `FOLIO_LLM_MODEL` or `LITELLM_DEFAULT_MODEL`: Text model (default: gpt-4o-mini)
    /// - `FOLIO_LLM_TEMPERATURE`: Temperature (default: 0.7)
    /// - `FOLIO_LLM_MAX_TOKENS`: Completion limit (default: 2048)
    /// - `FOLIO_DIFFUSION_URL`: txt2img backend base URL (optional)
    /// - `FOLIO_IMAGE_WIDTH` / `FOLIO_IMAGE_HEIGHT`: Image size (default: 768)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Storage settings
        if let Some(val) = lookup("FOLIO_DATABASE_URL") {
            config.database_url = val;
        }

        if let Some(val) = lookup("FOLIO_ASSET_DIR") {
            config.asset_dir = PathBuf::from(val);
        }

        // Pipeline settings
        if let Some(val) = lookup("FOLIO_STALE_THRESHOLD_SECS") {
            let secs: u64 = parse_env_value(&val, "FOLIO_STALE_THRESHOLD_SECS")?;
            config.stale_threshold = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("FOLIO_GENERATION_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FOLIO_GENERATION_TIMEOUT_SECS")?;
            config.generation_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("FOLIO_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FOLIO_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("FOLIO_FALLBACK_ON_ERROR") {
            config.fallback_on_error = parse_kind_list(&val, "FOLIO_FALLBACK_ON_ERROR")?;
        }

        // Batch settings
        if let Some(val) = lookup("FOLIO_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "FOLIO_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("FOLIO_STALL_POLLS") {
            config.stall_polls = parse_env_value(&val, "FOLIO_STALL_POLLS")?;
        }

        if let Some(val) = lookup("FOLIO_PREGENERATE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FOLIO_PREGENERATE_TIMEOUT_SECS")?;
            config.pregenerate_timeout = Duration::from_secs(secs);
        }

        // LLM settings
        if let Some(val) = lookup("FOLIO_LLM_MODEL").or_else(|| lookup("LITELLM_DEFAULT_MODEL")) {
            config.llm_model = val;
        }

        if let Some(val) = lookup("FOLIO_LLM_TEMPERATURE") {
            config.llm_temperature = parse_env_value(&val, "FOLIO_LLM_TEMPERATURE")?;
        }

        if let Some(val) = lookup("FOLIO_LLM_MAX_TOKENS") {
            config.llm_max_tokens = parse_env_value(&val, "FOLIO_LLM_MAX_TOKENS")?;
        }

        // Image settings
        if let Some(val) = lookup("FOLIO_DIFFUSION_URL") {
            let val = val.trim().trim_end_matches('/').to_string();
            config.diffusion_url = (!val.is_empty()).then_some(val);
        }

        if let Some(val) = lookup("FOLIO_IMAGE_WIDTH") {
            config.image_width = parse_env_value(&val, "FOLIO_IMAGE_WIDTH")?;
        }

        if let Some(val) = lookup("FOLIO_IMAGE_HEIGHT") {
            config.image_height = parse_env_value(&val, "FOLIO_IMAGE_HEIGHT")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.generation_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "generation_timeout must be greater than 0".to_string(),
            ));
        }

        // A generation still inside its timeout must never look stale.
        if self.generation_timeout >= self.stale_threshold {
            return Err(ConfigError::ValidationFailed(
                "generation_timeout must be shorter than stale_threshold".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.llm_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm_model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(ConfigError::ValidationFailed(
                "llm_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.image_width == 0
            || self.image_height == 0
            || self.image_width % 8 != 0
            || self.image_height % 8 != 0
        {
            return Err(ConfigError::ValidationFailed(
                "image dimensions must be positive multiples of 8".to_string(),
            ));
        }

        Ok(())
    }

    pub fn staleness(&self) -> StalenessPolicy {
        StalenessPolicy::new(self.stale_threshold)
    }

    /// Pipeline settings for one kind.
    pub fn settings_for(&self, kind: AssetKind) -> PipelineSettings {
        PipelineSettings {
            generation_timeout: self.generation_timeout,
            shutdown_timeout: self.shutdown_timeout,
            fallback_on_error: self.fallback_on_error.contains(&kind),
            staleness: self.staleness(),
            ..PipelineSettings::default()
        }
    }

    pub fn pregenerate_settings(&self) -> PregenerateSettings {
        PregenerateSettings {
            poll_interval: self.poll_interval,
            stall_polls: self.stall_polls,
            timeout: self.pregenerate_timeout,
        }
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the asset directory.
    pub fn with_asset_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.asset_dir = path.into();
        self
    }

    /// Builder method to set the stale threshold.
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Builder method to set the generation timeout.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Builder method to set the kinds that fall back on errors.
    pub fn with_fallback_on_error(mut self, kinds: Vec<AssetKind>) -> Self {
        self.fallback_on_error = kinds;
        self
    }

    /// Builder method to set the batch poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the diffusion backend URL.
    pub fn with_diffusion_url(mut self, url: impl Into<String>) -> Self {
        self.diffusion_url = Some(url.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse a comma-separated list of asset kinds; `all` selects every kind.
fn parse_kind_list(value: &str, key: &str) -> Result<Vec<AssetKind>, ConfigError> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(AssetKind::ALL.to_vec());
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|message| ConfigError::InvalidValue {
                key: key.to_string(),
                message,
            })
        })
        .collect()
}
