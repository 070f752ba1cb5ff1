//! Policy configuration for the authentication core.
//!
//! Loaded from environment variables with fail-fast validation: a
//! missing variable falls back to its default, but a present-and-invalid
//! one is a hard error at startup.

use chrono::Duration;
use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Default SSO session lifetime: short by design, renewed on reuse.
const DEFAULT_SSO_SESSION_TTL_SECONDS: i64 = 600;

/// Default cross-device transaction lifetime.
const DEFAULT_OTHER_DEVICE_TTL_SECONDS: i64 = 1200;

/// Default ceiling on failed response-code submissions from device 1.
const DEFAULT_OTHER_DEVICE_MAX_BAD_ATTEMPTS: u32 = 3;

/// Default terms-of-use re-acceptance interval (one year).
const DEFAULT_TOU_REACCEPT_INTERVAL_SECONDS: i64 = 365 * 24 * 3600;

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Policy knobs for the authentication core.
///
/// All durations are stored as whole seconds so the struct stays
/// trivially (de)serializable; accessors expose `chrono::Duration`.
#[derive(Debug, Clone, Deserialize)]
pub struct FedidConfig {
    /// SSO session lifetime in seconds.
    pub sso_session_ttl_seconds: i64,
    /// Cross-device transaction lifetime in seconds.
    pub other_device_ttl_seconds: i64,
    /// Failed response-code submissions allowed before the transaction
    /// is aborted.
    pub other_device_max_bad_attempts: u32,
    /// Currently configured terms-of-use version.
    pub tou_version: String,
    /// How recently a ToU acceptance must have happened to still count.
    pub tou_reaccept_interval_seconds: i64,
}

impl Default for FedidConfig {
    fn default() -> Self {
        Self {
            sso_session_ttl_seconds: DEFAULT_SSO_SESSION_TTL_SECONDS,
            other_device_ttl_seconds: DEFAULT_OTHER_DEVICE_TTL_SECONDS,
            other_device_max_bad_attempts: DEFAULT_OTHER_DEVICE_MAX_BAD_ATTEMPTS,
            tou_version: "2016-v1".to_string(),
            tou_reaccept_interval_seconds: DEFAULT_TOU_REACCEPT_INTERVAL_SECONDS,
        }
    }
}

impl FedidConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = read_i64("FEDID_SSO_SESSION_TTL_SECONDS")? {
            config.sso_session_ttl_seconds = v;
        }
        if let Some(v) = read_i64("FEDID_OTHER_DEVICE_TTL_SECONDS")? {
            config.other_device_ttl_seconds = v;
        }
        if let Some(v) = read_i64("FEDID_OTHER_DEVICE_MAX_BAD_ATTEMPTS")? {
            config.other_device_max_bad_attempts =
                u32::try_from(v).map_err(|_| ConfigError::InvalidValue {
                    name: "FEDID_OTHER_DEVICE_MAX_BAD_ATTEMPTS".to_string(),
                    message: format!("{v} out of range"),
                })?;
        }
        if let Ok(v) = env::var("FEDID_TOU_VERSION") {
            config.tou_version = v;
        }
        if let Some(v) = read_i64("FEDID_TOU_REACCEPT_INTERVAL_SECONDS")? {
            config.tou_reaccept_interval_seconds = v;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sso_session_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "FEDID_SSO_SESSION_TTL_SECONDS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.other_device_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "FEDID_OTHER_DEVICE_TTL_SECONDS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.other_device_max_bad_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FEDID_OTHER_DEVICE_MAX_BAD_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn sso_session_ttl(&self) -> Duration {
        Duration::seconds(self.sso_session_ttl_seconds)
    }

    #[must_use]
    pub fn other_device_ttl(&self) -> Duration {
        Duration::seconds(self.other_device_ttl_seconds)
    }

    #[must_use]
    pub fn tou_reaccept_interval(&self) -> Duration {
        Duration::seconds(self.tou_reaccept_interval_seconds)
    }
}

fn read_i64(name: &str) -> Result<Option<i64>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
