//! # Connection Errors
//!
//! One error type for every open and close failure. The plain `open_*` and
//! `close*` functions never return it: they abort the calling task through
//! [`fatal`]. The `try_*` variants hand it back instead.

use thiserror::Error;

/// Custom error types for connection bookkeeping.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[cfg(feature = "sql")]
    #[error("SQL driver error: {0}")]
    Sql(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Redis driver error: {0}")]
    Redis(#[from] redis::RedisError),

    #[cfg(feature = "mongo")]
    #[error("MongoDB driver error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Data source scheme '{scheme}' does not match driver '{driver}'")]
    DriverMismatch { driver: String, scheme: String },

    #[error("Invalid connection configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to close {kind} connection: {reason}")]
    Close { kind: &'static str, reason: String },
}

/// Logs `err` and panics with it. Used by every operation whose contract is to
/// abort on a driver failure.
#[track_caller]
pub(crate) fn fatal(action: &str, kind: &str, name: &str, err: ConnectionError) -> ! {
    log::error!("Failed to {} {} connection '{}': {}", action, kind, name, err);
    panic!("failed to {} {} connection '{}': {}", action, kind, name, err)
}
