//! Configuration types for sessions, the in-memory store and logging.
//!
//! [`BrokerConfig::load`] layers its sources in order, later sources
//! overriding earlier ones:
//!
//! 1. Built-in defaults (every field carries a serde default)
//! 2. `config/queue-session.{yaml,toml,json}` when present
//! 3. An explicit file path, which must exist when given
//! 4. Environment variables prefixed `QS` with `__` as separator,
//!    e.g. `QS__SESSION__MAX_OPEN_TRANSACTIONS=4`

use crate::error::{ConfigurationError, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Upper bound for the shutdown grace period
const MAX_SHUTDOWN_GRACE_PERIOD_MS: u64 = 60_000;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-session transaction settings
    pub session: SessionConfig,

    /// In-memory store bounds
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum open transactions per queue per session
    pub max_open_transactions: usize,

    /// Delay between a shutdown request and process termination
    pub shutdown_grace_period_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_open_transactions: 100,
            shutdown_grace_period_ms: 100,
        }
    }
}

impl SessionConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }
}

/// Admission bounds for [`InMemoryQueueStore`](crate::stores::InMemoryQueueStore)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum queued items per queue (unbounded when absent)
    pub max_items: Option<usize>,

    /// Maximum payload size in bytes (unbounded when absent)
    pub max_item_size: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl BrokerConfig {
    /// Environment variable prefix
    pub const ENV_PREFIX: &'static str = "QS";

    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Missing`] when `explicit_path` does not
    /// exist, [`ConfigurationError::Parsing`] when a source cannot be read
    /// or a value cannot be coerced to its field type, and
    /// [`ConfigurationError::Validation`] when the merged result is invalid.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/queue-session").required(false));

        if let Some(path) = explicit_path {
            if !path.exists() {
                return Err(ConfigurationError::Missing {
                    key: path.display().to_string(),
                });
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// Checks that:
    /// - the transaction cap is at least 1
    /// - the shutdown grace period does not exceed one minute
    /// - store bounds, when set, are non-zero
    /// - the log level is a known level name
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.session.max_open_transactions == 0 {
            return Err(ValidationError::OutOfRange {
                field: "session.max_open_transactions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.session.shutdown_grace_period_ms > MAX_SHUTDOWN_GRACE_PERIOD_MS {
            return Err(ValidationError::OutOfRange {
                field: "session.shutdown_grace_period_ms".to_string(),
                message: format!("must not exceed {}", MAX_SHUTDOWN_GRACE_PERIOD_MS),
            });
        }

        if self.store.max_items == Some(0) {
            return Err(ValidationError::OutOfRange {
                field: "store.max_items".to_string(),
                message: "must be at least 1 when set".to_string(),
            });
        }

        if self.store.max_item_size == Some(0) {
            return Err(ValidationError::OutOfRange {
                field: "store.max_item_size".to_string(),
                message: "must be at least 1 when set".to_string(),
            });
        }

        let level = self.logging.level.to_ascii_lowercase();
        if level.is_empty() {
            return Err(ValidationError::Required {
                field: "logging.level".to_string(),
            });
        }
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ValidationError::OutOfRange {
                field: "logging.level".to_string(),
                message: format!("must be one of {}", LOG_LEVELS.join(", ")),
            });
        }

        Ok(())
    }
}
