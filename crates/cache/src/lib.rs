//! High-level cache controller for larder.
//!
//! [`FileCache`] is the public entry point: it owns a file store for
//! bytes and a SQLite metadata store for records, and sequences every
//! operation so the two never disagree in a way cleanup cannot repair.
//!
//! ```no_run
//! use larder_cache::{AddOptions, FileCache};
//! use larder_core::CacheConfig;
//!
//! # async fn demo() -> Result<(), larder_cache::CacheError> {
//! let cache = FileCache::open(CacheConfig::new("/data/cache")).await?;
//! cache.add("genome.fa", "/tmp/genome.fa", AddOptions::default()).await?;
//! let content = cache.read("genome.fa").await?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
mod validate;

pub use controller::{AddOptions, FileCache, GetOptions, SourceAction, UpdateRequest};
pub use error::{CacheError, CacheResult};

// Re-exported so callers need only this crate for common flows.
pub use larder_core::{CacheConfig, QuotaPolicy, ResourceId};
pub use larder_metadata::{ListFilter, Resource, ResourceStats, ResourceType, SearchField};
