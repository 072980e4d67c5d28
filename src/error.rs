//! Error types for Ratewarden.

use thiserror::Error;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// A limiter was constructed with a zero budget or an empty window
    #[error("Invalid limiter configuration: {0}")]
    ConfigInvalid(String),

    /// Configuration loading or parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a counter store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The key is absent or its entry has expired.
    #[error("no live entry for key")]
    NotFound,

    /// The backend could not complete the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
