//! Configuration
//!
//! Settings for the streaming core, built in code or loaded from the
//! environment. Credentials are validated at construction and redact
//! themselves in debug output.
//!
//! Environment variables:
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `STREAM_URL` | yes | - |
//! | `STREAM_API_KEY` | yes | - |
//! | `STREAM_USER_KEY` | yes | - |
//! | `STREAM_RECONNECT_DELAY_INITIAL_MS` | no | 1000 |
//! | `STREAM_RECONNECT_DELAY_MAX_SECS` | no | 30 |
//! | `STREAM_MAX_RECONNECT_ATTEMPTS` | no | 0 (unlimited) |
//! | `STREAM_BATCH_WINDOW_MS` | no | 50 |
//! | `STREAM_STALENESS_POLL_INTERVAL_SECS` | no | 1 |
//! | `STREAM_ALERT_COOLDOWN_SECS` | no | 300 |

use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::infrastructure::connection::backoff::BackoffConfig;

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A value was present but empty or unparseable.
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

// =============================================================================
// Credentials
// =============================================================================

/// Feed credentials sent in the auth handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    user_key: String,
}

impl Credentials {
    /// Create credentials, rejecting empty keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when either key is empty.
    pub fn new(api_key: impl Into<String>, user_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        let user_key = user_key.into();
        if api_key.is_empty() {
            return Err(ConfigError::InvalidValue("api_key".to_string()));
        }
        if user_key.is_empty() {
            return Err(ConfigError::InvalidValue("user_key".to_string()));
        }
        Ok(Self { api_key, user_key })
    }

    /// The API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// The user key.
    #[must_use]
    pub fn user_key(&self) -> &str {
        &self.user_key
    }
}

// Keys never appear in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("user_key", &"***")
            .finish()
    }
}

// =============================================================================
// StreamConfig
// =============================================================================

/// Top-level configuration for [`StreamingCore`](crate::StreamingCore).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Feed endpoint.
    pub url: String,
    /// Handshake credentials.
    pub credentials: Credentials,
    /// Reconnect schedule.
    pub backoff: BackoffConfig,
    /// Subscription batching window.
    pub batch_window: Duration,
    /// Staleness poll cadence for the alerts engine.
    pub staleness_poll_interval: Duration,
    /// Minimum time between firings of the same alert.
    pub alert_cooldown: Duration,
}

impl StreamConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            backoff: BackoffConfig::default(),
            batch_window: Duration::from_millis(50),
            staleness_poll_interval: Duration::from_secs(1),
            alert_cooldown: Duration::from_secs(300),
        }
    }

    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = require_env("STREAM_URL")?;
        let credentials = Credentials::new(
            require_env("STREAM_API_KEY")?,
            require_env("STREAM_USER_KEY")?,
        )?;

        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(parse_env_u64(
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                1000,
            )?),
            max_delay: Duration::from_secs(parse_env_u64("STREAM_RECONNECT_DELAY_MAX_SECS", 30)?),
            jitter_factor: 0.0,
            max_attempts: parse_env_u32("STREAM_MAX_RECONNECT_ATTEMPTS", 0)?,
        };

        Ok(Self {
            url,
            credentials,
            backoff,
            batch_window: Duration::from_millis(parse_env_u64("STREAM_BATCH_WINDOW_MS", 50)?),
            staleness_poll_interval: Duration::from_secs(parse_env_u64(
                "STREAM_STALENESS_POLL_INTERVAL_SECS",
                1,
            )?),
            alert_cooldown: Duration::from_secs(parse_env_u64("STREAM_ALERT_COOLDOWN_SECS", 300)?),
        })
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_credentials() {
        assert!(Credentials::new("", "user").is_err());
        assert!(Credentials::new("key", "").is_err());
        assert!(Credentials::new("key", "user").is_ok());
    }

    #[test]
    fn debug_redacts_keys() {
        let credentials = Credentials::new("secret-api", "secret-user").unwrap();
        let output = format!("{credentials:?}");
        assert!(!output.contains("secret-api"));
        assert!(!output.contains("secret-user"));
        assert!(output.contains("***"));
    }

    #[test]
    fn defaults_match_protocol_timings() {
        let config = StreamConfig::new("wss://feed.test", Credentials::new("k", "u").unwrap());
        assert_eq!(config.batch_window, Duration::from_millis(50));
        assert_eq!(config.staleness_poll_interval, Duration::from_secs(1));
        assert_eq!(config.alert_cooldown, Duration::from_secs(300));
        assert_eq!(config.backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(config.backoff.max_delay, Duration::from_secs(30));
    }
}
