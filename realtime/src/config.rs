//! Realtime configuration.
//!
//! Provides configuration options for the connection manager.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable holding the endpoint URL.
pub const ENDPOINT_ENV: &str = "REALTIME_WS_URL";

/// Environment variable overriding the reconnect budget.
pub const MAX_RECONNECT_ATTEMPTS_ENV: &str = "REALTIME_MAX_RECONNECT_ATTEMPTS";

/// Environment variable overriding the reconnect delay in milliseconds.
pub const RECONNECT_DELAY_ENV: &str = "REALTIME_RECONNECT_DELAY_MS";

/// Default maximum reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Default fixed delay between reconnection attempts in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Reason sent with a deliberate close.
pub const DEFAULT_CLOSE_REASON: &str = "Client closed connection";

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Base WebSocket endpoint. The `token` query parameter is added per attempt.
    pub endpoint: Option<String>,

    /// Maximum automatic reconnection attempts after an abnormal close.
    pub max_reconnect_attempts: u32,

    /// Fixed delay before each reconnection attempt.
    pub reconnect_delay: Duration,

    /// Human-readable reason sent with a deliberate close.
    pub close_reason: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            close_reason: DEFAULT_CLOSE_REASON.to_string(),
        }
    }
}

impl RealtimeConfig {
    /// Creates a new configuration with the given endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    /// Loads the configuration from environment variables.
    ///
    /// Unset variables keep their defaults; an unset endpoint stays `None`
    /// and is reported when connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            endpoint: lookup(ENDPOINT_ENV).filter(|url| !url.trim().is_empty()),
            ..Default::default()
        };

        if let Some(value) = lookup(MAX_RECONNECT_ATTEMPTS_ENV) {
            config.max_reconnect_attempts =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: MAX_RECONNECT_ATTEMPTS_ENV.to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup(RECONNECT_DELAY_ENV) {
            let ms: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: RECONNECT_DELAY_ENV.to_string(),
                value: value.clone(),
            })?;
            config.reconnect_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the maximum reconnection attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the deliberate close reason.
    #[must_use]
    pub fn with_close_reason(mut self, reason: impl Into<String>) -> Self {
        self.close_reason = reason.into();
        self
    }

    /// Validates the configuration.
    ///
    /// The endpoint is not checked here; endpoint problems surface through
    /// the error listeners when connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::InvalidReconnectDelay);
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid reconnect delay.
    #[error("reconnect_delay must be > 0")]
    InvalidReconnectDelay,

    /// Environment variable with an unparsable value.
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },
}
