//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported snapshot schema version: found '{found}', expected '{expected}'")]
    SchemaVersion { found: String, expected: String },

    #[error("resource id counter exhausted")]
    IdExhausted,

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

impl MetadataError {
    /// Map a sqlx error to `AlreadyExists` when it is a UNIQUE violation on
    /// the given column, keeping the raw error otherwise.
    pub(crate) fn from_unique_violation(e: sqlx::Error, column: &str, value: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.message().contains("UNIQUE constraint") && db_err.message().contains(column) {
                return MetadataError::AlreadyExists(format!("{column} '{value}'"));
            }
        }
        MetadataError::Database(e)
    }
}
