//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid resource name '{name}': does not match pattern '{pattern}'")]
    InvalidName { name: String, pattern: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
