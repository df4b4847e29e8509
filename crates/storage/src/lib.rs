//! Physical file placement for the larder file cache.
//!
//! The [`FileStore`] owns the bytes under the cache root: atomic placement
//! (temp file + rename), transparent zstd compression, idempotent removal,
//! and orphan detection. Metadata consistency is the controller's job; this
//! crate never touches the database.

pub mod compression;
pub mod error;
pub mod filestore;

pub use error::{StorageError, StorageResult};
pub use filestore::{ByteStream, FileStore, StoredObject};
