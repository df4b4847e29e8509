//! Core domain types and shared logic for the larder file cache.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Resource identifiers (rid scheme, BiocFileCache-compatible)
//! - Content hashes (checksums)
//! - Construction configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod rid;

pub use config::{CacheConfig, QuotaPolicy};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use rid::{ResourceId, RID_PREFIX};

/// Filename of the metadata database inside the cache root.
///
/// Shared with the BiocFileCache reference format so a cache directory can
/// be opened by either implementation.
pub const DATABASE_FILENAME: &str = "BiocFileCache.sqlite";

/// Schema version written to the `metadata` table and embedded in
/// exported snapshots.
pub const SCHEMA_VERSION: &str = "0.99.4";
