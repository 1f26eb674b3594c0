//! Configuration management for Windowgate.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, WindowgateError};
use crate::ratelimit::{RateLimitConfig, DEFAULT_KEY_PREFIX};

/// Prefix for environment variable overrides, e.g. `WINDOWGATE__STORE__URL`.
const ENV_PREFIX: &str = "WINDOWGATE";

/// Main configuration for Windowgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowgateConfig {
    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Default limits applied to every identity
    #[serde(default)]
    pub limits: RateLimitConfig,
}

/// Which store adapter counts hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map, not shared between instances
    #[default]
    Memory,
    /// Redis instance shared by every process pointing at it
    Redis,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store adapter to use
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL, required for the redis backend
    #[serde(default)]
    pub url: Option<String>,

    /// Namespace prepended to every identity to build the store key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Timeout for each connection attempt, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Reconnection attempts after the first one fails
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,

    /// Upper bound on the backoff between attempts, in milliseconds
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retries: default_connect_retries(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_connect_retries() -> usize {
    2
}

fn default_max_retry_delay_ms() -> u64 {
    500
}

impl StoreConfig {
    /// Check that the selected backend has everything it needs.
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Redis
            && self.url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            return Err(WindowgateError::Config(
                "store.url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }
}

impl WindowgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WindowgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| WindowgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overridden by
    /// `WINDOWGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: WindowgateConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WindowgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.limits.validate()
    }
}
