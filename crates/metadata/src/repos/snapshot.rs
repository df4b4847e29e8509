//! Snapshot export/import for backup and migration.

use crate::error::MetadataResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// Serialized snapshot of every live resource record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version gate: import rejects versions it does not recognize
    /// without touching the existing store.
    pub schema_version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub resources: Vec<SnapshotResource>,
}

/// One resource record in a snapshot. Carries every externally meaningful
/// field; the store-internal autoincrement row id is deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResource {
    pub rid: String,
    pub rname: String,
    #[serde(with = "time::serde::rfc3339")]
    pub create_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub access_time: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_modified_time: Option<OffsetDateTime>,
    pub rpath: String,
    pub rtype: String,
    #[serde(default)]
    pub fpath: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires: Option<OffsetDateTime>,
    #[serde(default)]
    pub checksum: Option<String>,
    pub size_bytes: i64,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Bulk dump/restore of the resource table.
#[async_trait]
pub trait SnapshotRepo: Send + Sync {
    /// Export every live record as a snapshot.
    async fn export_snapshot(&self) -> MetadataResult<Snapshot>;

    /// Restore a snapshot into this store.
    ///
    /// Validates the schema version before any write; all rows, tag links
    /// and the rid-counter floor are committed in one transaction, so a
    /// failed import leaves the store unchanged. Returns the number of
    /// resources imported.
    async fn import_snapshot(&self, snapshot: &Snapshot) -> MetadataResult<u64>;
}
