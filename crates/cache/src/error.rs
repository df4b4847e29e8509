//! Cache-level error types.

use larder_metadata::MetadataError;
use larder_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource name already in use: {0}")]
    DuplicateName(String),

    #[error("invalid resource name '{name}': must match {pattern}")]
    InvalidName { name: String, pattern: String },

    #[error("corrupt resource '{rname}': expected checksum {expected}, found {actual}")]
    Corruption {
        rname: String,
        expected: String,
        actual: String,
    },

    #[error("over quota: {needed} bytes needed, {quota} bytes available")]
    OverQuota { needed: u64, quota: u64 },

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Metadata(MetadataError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

impl From<MetadataError> for CacheError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(what) => CacheError::NotFound(what),
            MetadataError::AlreadyExists(what) => CacheError::DuplicateName(what),
            other => CacheError::Metadata(other),
        }
    }
}

impl From<StorageError> for CacheError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => CacheError::NotFound(what),
            other => CacheError::Storage(other),
        }
    }
}

impl From<larder_core::Error> for CacheError {
    fn from(e: larder_core::Error) -> Self {
        match e {
            larder_core::Error::InvalidName { name, pattern } => {
                CacheError::InvalidName { name, pattern }
            }
            other => CacheError::Config(other.to_string()),
        }
    }
}
