//! Resource identifier generation backed by the persisted counter.

use crate::error::MetadataResult;
use async_trait::async_trait;
use larder_core::ResourceId;

/// Generates stable resource ids from the single-row `id_counter` table.
///
/// The counter is persisted so restarts never reuse an id, and rendered in
/// the reference textual format (`BFC<n>`). Exhaustion is only possible if
/// the counter overflows its i64 width, a theoretical bound surfaced as
/// [`MetadataError::IdExhausted`](crate::MetadataError::IdExhausted).
#[async_trait]
pub trait IdRepo: Send + Sync {
    /// Claim the next resource id, durably advancing the counter.
    ///
    /// Snapshot import raises the counter floor itself, inside its own
    /// transaction, so restored ids stay ahead of future claims.
    async fn next_rid(&self) -> MetadataResult<ResourceId>;
}
