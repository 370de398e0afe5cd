//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "JSONAPI_FETCH_";

/// Legacy variable holding the backend base URL
pub const BASE_URL_ENV: &str = "API_BASE_URL";

/// Default backend base URL
pub const DEFAULT_BASE_URL: &str = "https://aabenforms.ddev.site";

/// Fetch client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Environment files to load before resolving the configuration.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Backend base URL; resources live under `{base_url}/jsonapi`
    pub base_url: String,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// Retry policy for reads
    pub read_retry: RetryConfig,
    /// Retry policy for writes
    pub write_retry: RetryConfig,
    /// Per-request transport timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            cache: CacheConfig::default(),
            read_retry: RetryConfig::reads(),
            write_retry: RetryConfig::writes(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Cache configuration for response caching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching
    pub enabled: bool,
    /// TTL for cached responses
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of entries before the oldest is evicted (unbounded if unset)
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(5 * 60),
            max_entries: None,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries
    pub enabled: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
    /// Randomize delays
    pub jitter: bool,
}

impl RetryConfig {
    /// Read defaults: 3 retries, 1s, 2s, 4s
    #[must_use]
    pub fn reads() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Write defaults: 2 retries
    #[must_use]
    pub fn writes() -> Self {
        Self {
            max_retries: 2,
            ..Self::reads()
        }
    }

    /// Check that the backoff parameters describe a growing, bounded sequence
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming `section` when the multiplier is not a
    /// finite number of at least 1.0 or `initial_backoff` exceeds `max_backoff`.
    pub fn validate(&self, section: &str) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "{section}.multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::Config(format!(
                "{section}.initial_backoff ({:?}) exceeds max_backoff ({:?})",
                self.initial_backoff, self.max_backoff
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::reads()
    }
}

impl ClientConfig {
    /// Load configuration from file and environment
    ///
    /// Precedence, lowest first: built-in defaults, `API_BASE_URL`, the YAML
    /// file, `JSONAPI_FETCH_*` variables (nested keys split on `__`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or the resulting base URL is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
        }

        let mut config = Self::extract(path)?;

        // Env files may carry API_BASE_URL or JSONAPI_FETCH_* values
        if config.load_env_files() {
            config = Self::extract(path)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(
            Env::raw()
                .only(&[BASE_URL_ENV])
                .map(|_| "base_url".into()),
        );

        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(path: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are skipped.
    ///
    /// Returns `true` if at least one file was loaded.
    fn load_env_files(&self) -> bool {
        let mut loaded = false;
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                        loaded = true;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
        loaded
    }

    /// Normalize the base URL and check it and both retry policies
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the base URL is not an absolute http(s) URL
    /// or a retry policy is malformed.
    pub fn validate(&mut self) -> Result<()> {
        self.read_retry.validate("read_retry")?;
        self.write_retry.validate("write_retry")?;

        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        let url = Url::parse(&trimmed)
            .map_err(|e| Error::Config(format!("Invalid base_url {trimmed:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Unsupported base_url scheme: {}",
                url.scheme()
            )));
        }
        self.base_url = trimmed;
        Ok(())
    }

    /// The JSON:API entry point, `{base_url}/jsonapi`
    #[must_use]
    pub fn jsonapi_root(&self) -> String {
        format!("{}/jsonapi", self.base_url)
    }

    /// Override the base URL (e.g. from the command line)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "1500ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "100ms", "30s", "5m" or a bare number of seconds
    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim().parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
