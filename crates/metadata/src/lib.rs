//! Metadata store abstraction and SQLite implementation for larder.
//!
//! This crate provides the control-plane data model:
//! - Resource records and the tag relation
//! - The persisted rid counter
//! - Snapshot export/import for backup and migration
//!
//! The table layout stays column-compatible with the BiocFileCache
//! reference format (`resource`, `metadata` tables, `BFC<n>` rids) so a
//! cache directory can be opened by either implementation.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{
    ListFilter, NewResource, Resource, ResourceStats, ResourceType, ResourceUpdate, SearchField,
};
pub use repos::{IdRepo, ResourceRepo, SnapshotRepo};
pub use repos::snapshot::{Snapshot, SnapshotResource};
pub use store::{MetadataStore, SqliteStore};
