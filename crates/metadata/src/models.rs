//! Database models mapping to the metadata schema.

use larder_core::ResourceId;
use sqlx::FromRow;
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// Resource row as persisted in the `resource` table.
///
/// Column names follow the BiocFileCache reference schema; `checksum`,
/// `size_bytes` and `compressed` are additive columns the reference
/// implementation tolerates.
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub rid: String,
    pub rname: String,
    pub create_time: OffsetDateTime,
    pub access_time: OffsetDateTime,
    pub last_modified_time: Option<OffsetDateTime>,
    pub rpath: String,
    pub rtype: String,
    pub fpath: Option<String>,
    pub etag: Option<String>,
    pub expires: Option<OffsetDateTime>,
    pub checksum: Option<String>,
    pub size_bytes: i64,
    pub compressed: bool,
}

/// Kind of source a resource was created from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// A local file copied or moved into the cache.
    #[default]
    Local,
    /// A resource fetched from a URL; `etag` caches its validator header.
    Web,
    /// A path relative to the cache root, stored as-is.
    Relative,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Web => "web",
            Self::Relative => "relative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "web" => Some(Self::Web),
            "relative" => Some(Self::Relative),
            _ => None,
        }
    }
}

/// A fully materialized resource record.
///
/// Plain value object: every field is copied out of the transaction scope
/// before being returned, so no access here ever triggers a storage
/// round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub rid: ResourceId,
    pub rname: String,
    pub create_time: OffsetDateTime,
    pub access_time: OffsetDateTime,
    pub last_modified_time: Option<OffsetDateTime>,
    pub rpath: String,
    pub rtype: String,
    pub fpath: Option<String>,
    pub etag: Option<String>,
    pub expires: Option<OffsetDateTime>,
    pub checksum: Option<String>,
    pub size_bytes: i64,
    pub compressed: bool,
    pub tags: BTreeSet<String>,
}

impl Resource {
    pub(crate) fn from_row(row: ResourceRow, tags: BTreeSet<String>) -> Self {
        Self {
            rid: ResourceId::from(row.rid),
            rname: row.rname,
            create_time: row.create_time,
            access_time: row.access_time,
            last_modified_time: row.last_modified_time,
            rpath: row.rpath,
            rtype: row.rtype,
            fpath: row.fpath,
            etag: row.etag,
            expires: row.expires,
            checksum: row.checksum,
            size_bytes: row.size_bytes,
            compressed: row.compressed,
            tags,
        }
    }

    /// Whether the resource is past its expiration at `now`.
    ///
    /// Expiration is a derived state, not a stored flag: an expired
    /// resource stays retrievable until cleanup removes it.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.map(|e| now >= e).unwrap_or(false)
    }
}

/// Fields for a new resource row. The rid is generated beforehand via
/// [`IdRepo::next_rid`](crate::repos::IdRepo::next_rid) so the physical
/// file can be placed before the row is inserted.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub rid: ResourceId,
    pub rname: String,
    pub rpath: String,
    pub rtype: ResourceType,
    pub fpath: Option<String>,
    pub etag: Option<String>,
    pub expires: Option<OffsetDateTime>,
    pub checksum: Option<String>,
    pub size_bytes: i64,
    pub compressed: bool,
    pub tags: BTreeSet<String>,
}

/// Partial update of a resource row. `None` leaves the field untouched;
/// the nested options distinguish "clear" from "keep".
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub access_time: Option<OffsetDateTime>,
    pub last_modified_time: Option<OffsetDateTime>,
    pub checksum: Option<String>,
    pub etag: Option<Option<String>>,
    pub expires: Option<Option<OffsetDateTime>>,
    pub size_bytes: Option<i64>,
    pub compressed: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
}

/// Filter for listing resources.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Only resources carrying this tag.
    pub tag: Option<String>,
    /// Only resources of this type.
    pub rtype: Option<ResourceType>,
    /// `Some(true)` for expired only, `Some(false)` for live only.
    pub expired: Option<bool>,
}

/// Field targeted by a metadata search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Name,
    Rid,
    Path,
    Tag,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStats {
    pub count: u64,
    pub cache_size_bytes: u64,
    pub expired_count: u64,
    pub oldest: Option<OffsetDateTime>,
    pub newest: Option<OffsetDateTime>,
    /// Tag name to number of resources carrying it, sorted by tag.
    pub tag_distribution: Vec<(String, u64)>,
}
