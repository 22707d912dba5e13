//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `REGUSTO_API_BASE_URL` - Backend base URL (default: `https://regusto.azurewebsites.net`)
//! - `REGUSTO_PUSHER_KEY` - Realtime app key; realtime chat is disabled without it
//! - `REGUSTO_PUSHER_CLUSTER` - Realtime cluster (default: sa1)
//! - `REGUSTO_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `REGUSTO_STALE_TIME_SECS` - Age after which cached queries refetch (default: 300)
//! - `REGUSTO_QUERY_RETRIES` - Retries for queries failing with no response (default: 2)
//! - `REGUSTO_RECONNECT_MAX_ATTEMPTS` - Realtime reconnect attempts before giving up (default: 10)
//! - `REGUSTO_RECONNECT_MAX_DELAY_SECS` - Cap on reconnect backoff (default: 30)
//! - `REGUSTO_RETURN_URL` - Deep link the payment provider returns to (default: `regusto://payment-success`)
//! - `REGUSTO_SESSION_FILE` - Path of the durable session store (in-memory when unset)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "https://regusto.azurewebsites.net";
const DEFAULT_PUSHER_CLUSTER: &str = "sa1";
const DEFAULT_RETURN_URL: &str = "regusto://payment-success";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (no trailing slash)
    pub api_base_url: String,
    /// Realtime provider configuration, if realtime is enabled
    pub pusher: Option<PusherConfig>,
    /// Timeout applied to every gateway call
    pub request_timeout: Duration,
    /// Cached data younger than this is served without a network load
    pub stale_time: Duration,
    /// Retries for queries failing with a network error
    pub query_retries: u32,
    /// Realtime reconnect policy
    pub reconnect: ReconnectConfig,
    /// Deep link the payment provider redirects to
    pub return_url: String,
    /// Durable session store location
    pub session_file: Option<PathBuf>,
}

/// Realtime provider (Pusher protocol) configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusherConfig {
    /// Public application key
    pub key: String,
    /// Cluster name (e.g., sa1)
    pub cluster: String,
}

/// Capped exponential backoff for realtime reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Consecutive failed attempts before the channel is marked failed
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ClientConfig {
    /// Default configuration against `api_base_url`.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            pusher: None,
            request_timeout: Duration::from_secs(30),
            stale_time: Duration::from_secs(300),
            query_retries: 2,
            reconnect: ReconnectConfig::default(),
            return_url: DEFAULT_RETURN_URL.to_string(),
            session_file: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvSource(lookup);

        let api_base_url = env.or_default("REGUSTO_API_BASE_URL", DEFAULT_API_BASE_URL);
        Url::parse(&api_base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("REGUSTO_API_BASE_URL".to_string(), e.to_string())
        })?;

        let return_url = env.or_default("REGUSTO_RETURN_URL", DEFAULT_RETURN_URL);
        Url::parse(&return_url).map_err(|e| {
            ConfigError::InvalidEnvVar("REGUSTO_RETURN_URL".to_string(), e.to_string())
        })?;

        let pusher = env.optional("REGUSTO_PUSHER_KEY").map(|key| PusherConfig {
            key,
            cluster: env.or_default("REGUSTO_PUSHER_CLUSTER", DEFAULT_PUSHER_CLUSTER),
        });

        let defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            base_delay: defaults.base_delay,
            max_delay: Duration::from_secs(env.parsed("REGUSTO_RECONNECT_MAX_DELAY_SECS", 30)?),
            max_attempts: env.parsed("REGUSTO_RECONNECT_MAX_ATTEMPTS", defaults.max_attempts)?,
        };

        let mut config = Self::new(api_base_url);
        config.pusher = pusher;
        config.request_timeout = Duration::from_secs(env.parsed("REGUSTO_REQUEST_TIMEOUT_SECS", 30)?);
        config.stale_time = Duration::from_secs(env.parsed("REGUSTO_STALE_TIME_SECS", 300)?);
        config.query_retries = env.parsed("REGUSTO_QUERY_RETRIES", 2)?;
        config.reconnect = reconnect;
        config.return_url = return_url;
        config.session_file = env.optional("REGUSTO_SESSION_FILE").map(PathBuf::from);
        Ok(config)
    }

    /// Resolve an API path against the base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct EnvSource<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    /// Get an optional variable, treating empty values as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Get and parse a variable with a default value.
    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }
}
