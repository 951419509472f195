//! Core error types.

use std::time::Duration;

use thiserror::Error;

/// Configuration errors - raised while wiring buckets, rules and routes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown rate limit bucket: {0}")]
    UnknownBucket(String),

    #[error("Invalid policy for bucket {bucket}: {reason}")]
    InvalidPolicy { bucket: String, reason: String },

    #[error("Invalid address rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// Counter store errors.
///
/// These never reach the client: the limiter logs them and fails open.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store data corrupt: {0}")]
    Corrupt(String),
}

/// Errors from limiter operations that surface store failures to the caller.
///
/// `check` never returns these; it fails open instead.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
