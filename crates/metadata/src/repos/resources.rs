//! Resource repository trait.

use crate::error::MetadataResult;
use crate::models::{
    ListFilter, NewResource, Resource, ResourceStats, ResourceUpdate, SearchField,
};
use async_trait::async_trait;
use std::collections::HashSet;
use time::OffsetDateTime;

/// Transactional CRUD over resource rows and the tag relation.
///
/// Every multi-row operation (row + tag links) runs inside one transaction;
/// on failure the transaction rolls back and the store is unchanged.
/// Returned [`Resource`] values are fully materialized.
#[async_trait]
pub trait ResourceRepo: Send + Sync {
    /// Insert a new resource row with its tag links.
    ///
    /// Fails with `AlreadyExists` if `rname` is already live.
    async fn create(&self, new: &NewResource) -> MetadataResult<Resource>;

    /// Look up a live resource by logical name.
    async fn get_by_name(&self, rname: &str) -> MetadataResult<Option<Resource>>;

    /// Look up a live resource by rid.
    async fn get_by_rid(&self, rid: &str) -> MetadataResult<Option<Resource>>;

    /// Partially update the resource identified by `rid`.
    ///
    /// Fails with `NotFound` if absent. `rid`, `rname` and `create_time`
    /// are immutable through this path.
    async fn update(&self, rid: &str, update: &ResourceUpdate) -> MetadataResult<Resource>;

    /// Record an access at `at` for the named resource.
    async fn touch_access(&self, rname: &str, at: OffsetDateTime) -> MetadataResult<()>;

    /// Delete the resource row and its tag links. Returns whether a row
    /// existed.
    async fn delete(&self, rid: &str) -> MetadataResult<bool>;

    /// Delete every resource row. Returns the number of rows removed.
    async fn delete_all(&self) -> MetadataResult<u64>;

    /// List resources matching the filter.
    async fn list(&self, filter: &ListFilter) -> MetadataResult<Vec<Resource>>;

    /// Search resources by field value, case-insensitive substring match
    /// unless `exact`.
    async fn search(
        &self,
        query: &str,
        field: SearchField,
        exact: bool,
    ) -> MetadataResult<Vec<Resource>>;

    /// Resources whose expiration is at or before `now`.
    async fn expired_as_of(&self, now: OffsetDateTime) -> MetadataResult<Vec<Resource>>;

    /// Live candidates for quota eviction, least recently accessed first.
    async fn lru_candidates(&self, limit: u32) -> MetadataResult<Vec<Resource>>;

    /// The set of relative paths referenced by live rows.
    async fn live_paths(&self) -> MetadataResult<HashSet<String>>;

    /// Sum of `size_bytes` over live rows.
    async fn total_size(&self) -> MetadataResult<u64>;

    /// Aggregate statistics with expiration evaluated at `now`.
    async fn stats(&self, now: OffsetDateTime) -> MetadataResult<ResourceStats>;
}
