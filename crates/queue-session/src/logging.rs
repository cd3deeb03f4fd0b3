//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::ConfigurationError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns [`ConfigurationError::Invalid`] when a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigurationError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_ascii_lowercase()));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    result.map_err(|e| ConfigurationError::Invalid {
        message: format!("logging already initialised: {}", e),
    })
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
