//! Configuration models for sensemake.
//!
//! Everything a client or a retry loop would otherwise take from a global
//! default is parameterized here and handed over at construction.

use crate::invoke::RetryPolicy;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level configuration for sensemake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model backend configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Retry policy for model calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Categorization settings
    #[serde(default)]
    pub categorization: CategorizationConfig,
}

/// Which wire protocol the backend speaks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Ollama native API (`/api/generate`)
    #[default]
    Ollama,
    /// Any OpenAI-compatible chat completions API
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Ollama => write!(f, "ollama"),
            Backend::OpenAi => write!(f, "openai"),
        }
    }
}

/// Model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend protocol
    #[serde(default)]
    pub backend: Backend,

    /// Base URL (e.g. "http://localhost:11434" or "https://openrouter.ai/api/v1")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier as the backend knows it
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// API key (values may contain ${ENV_VAR})
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Custom headers to include in requests
    /// Values can contain ${ENV_VAR} for environment variable expansion
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Context window size passed to backends that accept one
    #[serde(default)]
    pub num_ctx: Option<u32>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f64,

    /// Output token cap, if the backend should enforce one
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Records per categorization prompt
    #[serde(default = "default_batch_size")]
    pub categorization_batch_size: usize,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model_id() -> String {
    "llama3.1".to_string()
}

fn default_timeout() -> u64 {
    180
}

fn default_batch_size() -> usize {
    100
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            base_url: default_base_url(),
            model_id: default_model_id(),
            api_key: None,
            api_key_env: None,
            headers: HashMap::new(),
            num_ctx: None,
            timeout_secs: default_timeout(),
            temperature: 0.0,
            max_tokens: None,
            categorization_batch_size: default_batch_size(),
        }
    }
}

impl ModelConfig {
    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from config or environment.
    ///
    /// Returns `Ok(None)` when no key is configured, which is valid for local
    /// endpoints.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        if let Some(env_var) = &self.api_key_env {
            return std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    env_var: env_var.clone(),
                });
        }

        Ok(None)
    }

    /// Headers sent with every request: bearer auth when a key is given,
    /// then the configured custom headers with `${VAR}` expanded.
    ///
    /// Custom headers whose name or value is not a legal HTTP header are
    /// skipped with a warning.
    pub fn request_headers(&self, api_key: Option<&str>) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();

        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
                ConfigError::Invalid("API key contains invalid header characters".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        for (key, value) in expand_headers(&self.headers) {
            match (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => warn!(header = %key, "Skipping invalid custom header"),
            }
        }

        Ok(headers)
    }
}

/// Retry configuration for model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per logical request
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in seconds
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_secs() -> u64 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl RetryConfig {
    /// Build the retry policy described by this section.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

/// Categorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizationConfig {
    /// Optional instructions prepended to every categorization prompt
    #[serde(default)]
    pub instructions: Option<String>,

    /// Overrides the model's batch size when set
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Batches in flight at once; each batch still retries sequentially
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
}

fn default_max_concurrent_batches() -> usize {
    10
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            instructions: None,
            batch_size: None,
            max_concurrent_batches: default_max_concurrent_batches(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Check values that serde cannot reject on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("model.base_url is empty".to_string()));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(ConfigError::Invalid("model.model_id is empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.categorization.max_concurrent_batches == 0 {
            return Err(ConfigError::Invalid(
                "categorization.max_concurrent_batches must be at least 1".to_string(),
            ));
        }
        if self.effective_batch_size() == 0 {
            return Err(ConfigError::Invalid(
                "categorization batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Batch size after applying the categorization override.
    pub fn effective_batch_size(&self) -> usize {
        self.categorization
            .batch_size
            .unwrap_or(self.model.categorization_batch_size)
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };
    let mut result = s.to_string();

    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or model.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
