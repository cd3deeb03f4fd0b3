//! Error types for session operations.

use thiserror::Error;

/// Faults that cross the session boundary.
///
/// Only admission control surfaces as an error. Every other queue-store
/// interaction is reported through an `Option` or `bool` outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(
        "Too many open transactions on queue '{queue}' (limit: {max_open_transactions})"
    )]
    TooManyOpenTransactions {
        queue: String,
        max_open_transactions: usize,
    },
}

impl SessionError {
    /// Check if the same command may succeed when retried later
    pub fn is_transient(&self) -> bool {
        match self {
            // Confirming or aborting an open transaction frees a slot.
            Self::TooManyOpenTransactions { .. } => true,
        }
    }

    /// Queue the failing command targeted
    pub fn queue(&self) -> &str {
        match self {
            Self::TooManyOpenTransactions { queue, .. } => queue,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },

    #[error("Configuration value rejected: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
