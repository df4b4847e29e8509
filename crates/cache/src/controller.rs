//! Cache controller: the public entry point tying metadata and file
//! storage together.

use crate::error::{CacheError, CacheResult};
use crate::validate::verify_checksum;
use bytes::Bytes;
use larder_core::{CacheConfig, QuotaPolicy, DATABASE_FILENAME};
use larder_metadata::{
    IdRepo, ListFilter, NewResource, Resource, ResourceRepo, ResourceStats, ResourceType,
    ResourceUpdate, SearchField, Snapshot, SnapshotRepo, SqliteStore,
};
use larder_storage::{FileStore, StoredObject};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

/// How the source file enters the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceAction {
    /// Copy the source, leaving the original in place.
    #[default]
    Copy,
    /// Move the source into the cache, removing the original.
    Move,
}

/// Options for [`FileCache::add`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub tags: BTreeSet<String>,
    pub expires: Option<OffsetDateTime>,
    /// Overrides the configured compression default when set.
    pub compress: Option<bool>,
    pub action: SourceAction,
    pub rtype: ResourceType,
    /// Validator header for web-sourced resources.
    pub etag: Option<String>,
}

/// Options for [`FileCache::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Force a checksum verification regardless of the configured
    /// `verify_on_get`.
    pub verify: bool,
    /// Treat expired resources as absent instead of returning them.
    pub strict: bool,
}

/// Fields changed by [`FileCache::update`]. `None` leaves a field alone;
/// the nested options distinguish "clear" from "keep".
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Replace the cached file with this source.
    pub source: Option<PathBuf>,
    pub tags: Option<BTreeSet<String>>,
    pub expires: Option<Option<OffsetDateTime>>,
    pub etag: Option<Option<String>>,
}

/// File-system-backed resource cache with SQLite metadata.
///
/// All mutating operations follow a fixed ordering so a crash between the
/// file write and the metadata write leaves at worst an orphaned file,
/// never a metadata row pointing at nothing. Orphans are reclaimed by
/// [`cleanup`](Self::cleanup).
pub struct FileCache {
    config: CacheConfig,
    name_pattern: Regex,
    store: SqliteStore,
    files: FileStore,
}

impl FileCache {
    /// Open a cache rooted at `config.cache_dir`, creating the directory
    /// and metadata database if absent.
    #[instrument(skip(config), fields(cache_dir = %config.cache_dir.display()))]
    pub async fn open(config: CacheConfig) -> CacheResult<Self> {
        let name_pattern = config.compiled_name_pattern()?;
        let files = FileStore::new(&config.cache_dir).await?;
        let store = SqliteStore::new(config.cache_dir.join(DATABASE_FILENAME)).await?;
        info!(cache_dir = %config.cache_dir.display(), "cache opened");
        Ok(Self {
            config,
            name_pattern,
            store,
            files,
        })
    }

    /// The cache root directory.
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Absolute path of a resource's cached file.
    pub fn resource_path(&self, resource: &Resource) -> PathBuf {
        self.config.cache_dir.join(&resource.rpath)
    }

    /// Add a file to the cache under a unique logical name.
    ///
    /// The id is claimed and the file placed before the metadata row is
    /// inserted; if the insert fails the file is unlinked again, so a
    /// duplicate name leaves no trace on disk.
    #[instrument(skip(self, source, opts), fields(rname = %rname))]
    pub async fn add(
        &self,
        rname: &str,
        source: impl AsRef<Path>,
        opts: AddOptions,
    ) -> CacheResult<Resource> {
        let source = source.as_ref();
        self.config.validate_name(&self.name_pattern, rname)?;

        let source_size = tokio::fs::metadata(source)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CacheError::Storage(larder_storage::StorageError::SourceMissing(
                        source.display().to_string(),
                    ))
                } else {
                    CacheError::Io(e)
                }
            })?
            .len();
        self.ensure_headroom(source_size, None).await?;

        let rid = self.store.next_rid().await?;
        let rpath = destination_name(rid.as_str(), source);
        let compress = opts.compress.unwrap_or(self.config.compress_default);

        let stored = self.place_file(source, &rpath, compress, opts.action).await?;

        let new = NewResource {
            rid,
            rname: rname.to_string(),
            rpath: rpath.clone(),
            rtype: opts.rtype,
            fpath: Some(source.display().to_string()),
            etag: opts.etag,
            expires: opts.expires,
            checksum: Some(stored.checksum.to_hex()),
            size_bytes: stored.size_bytes as i64,
            compressed: compress,
            tags: opts.tags,
        };

        match self.store.create(&new).await {
            Ok(resource) => {
                debug!(rid = %resource.rid, rname = %rname, "resource added");
                Ok(resource)
            }
            Err(e) => {
                // Roll the file placement back so a rejected add leaves the
                // cache directory unchanged.
                if let Err(cleanup_err) = self.files.remove(&rpath).await {
                    warn!(rpath = %rpath, error = %cleanup_err, "failed to unlink after rejected add");
                }
                Err(e.into())
            }
        }
    }

    /// Add several resources in one call.
    ///
    /// Stops at the first failure and removes the resources this call
    /// already created (rows and files), so the cache gains either every
    /// entry in the batch or none of them. Sources consumed by a
    /// [`SourceAction::Move`] before the failure are not restored.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn add_batch(
        &self,
        items: Vec<(String, PathBuf, AddOptions)>,
    ) -> CacheResult<Vec<Resource>> {
        let mut added = Vec::with_capacity(items.len());
        for (rname, source, opts) in items {
            match self.add(&rname, &source, opts).await {
                Ok(resource) => added.push(resource),
                Err(e) => {
                    for resource in &added {
                        if let Err(rollback_err) = self.remove(&resource.rname).await {
                            warn!(
                                rname = %resource.rname,
                                error = %rollback_err,
                                "batch rollback failed; resource left in place"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(added)
    }

    /// Fetch a resource by name, recording the access.
    ///
    /// Expiration is logical: an expired resource is still returned here
    /// (use [`GetOptions::strict`] to refuse it) and stays on disk until
    /// [`cleanup`](Self::cleanup) reclaims it.
    pub async fn get(&self, rname: &str) -> CacheResult<Resource> {
        self.get_opts(rname, GetOptions::default()).await
    }

    /// [`get`](Self::get) with explicit options.
    #[instrument(skip(self, opts), fields(rname = %rname))]
    pub async fn get_opts(&self, rname: &str, opts: GetOptions) -> CacheResult<Resource> {
        let resource = self
            .store
            .get_by_name(rname)
            .await?
            .ok_or_else(|| CacheError::NotFound(rname.to_string()))?;

        let now = OffsetDateTime::now_utc();
        if opts.strict && resource.is_expired(now) {
            return Err(CacheError::NotFound(format!("{rname} (expired)")));
        }

        if self.config.verify_on_get || opts.verify {
            verify_checksum(&self.files, &resource).await?;
        }

        self.store.touch_access(rname, now).await?;
        Ok(Resource {
            access_time: now,
            ..resource
        })
    }

    /// Read a resource's content, decompressing transparently.
    pub async fn read(&self, rname: &str) -> CacheResult<Bytes> {
        let resource = self.get(rname).await?;
        Ok(self
            .files
            .retrieve(&resource.rpath, resource.compressed)
            .await?)
    }

    /// Update a resource in place.
    ///
    /// The rid, name, creation time and cached path never change. A new
    /// source replaces the file through an atomic rename, so concurrent
    /// readers see either the old content or the new, never a mix.
    #[instrument(skip(self, request), fields(rname = %rname))]
    pub async fn update(&self, rname: &str, request: UpdateRequest) -> CacheResult<Resource> {
        let resource = self
            .store
            .get_by_name(rname)
            .await?
            .ok_or_else(|| CacheError::NotFound(rname.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let mut update = ResourceUpdate {
            access_time: Some(now),
            tags: request.tags,
            etag: request.etag,
            expires: request.expires,
            ..Default::default()
        };

        if let Some(source) = &request.source {
            let new_size = tokio::fs::metadata(source).await?.len();
            let old_size = resource.size_bytes.max(0) as u64;
            self.ensure_headroom(new_size.saturating_sub(old_size), Some(resource.rid.as_str()))
                .await?;

            let stored = self
                .files
                .store(source, &resource.rpath, resource.compressed)
                .await?;
            update.checksum = Some(stored.checksum.to_hex());
            update.size_bytes = Some(stored.size_bytes as i64);
            update.last_modified_time = Some(now);
        }

        Ok(self.store.update(resource.rid.as_str(), &update).await?)
    }

    /// Remove a resource and its file. Returns whether it existed.
    ///
    /// The metadata row goes first; if the unlink then fails the file is an
    /// orphan that [`cleanup`](Self::cleanup) reclaims later.
    #[instrument(skip(self), fields(rname = %rname))]
    pub async fn remove(&self, rname: &str) -> CacheResult<bool> {
        let Some(resource) = self.store.get_by_name(rname).await? else {
            return Ok(false);
        };

        self.store.delete(resource.rid.as_str()).await?;
        if let Err(e) = self.files.remove(&resource.rpath).await {
            warn!(rpath = %resource.rpath, error = %e, "file unlink failed; orphan left for cleanup");
        }
        info!(rid = %resource.rid, rname = %rname, "resource removed");
        Ok(true)
    }

    /// Remove every resource and cached file. The id counter is not reset,
    /// so ids are never reused across a purge. Idempotent.
    #[instrument(skip(self))]
    pub async fn purge(&self) -> CacheResult<u64> {
        let removed = self.store.delete_all().await?;
        let leftovers = self.files.scan_orphans(&HashSet::new()).await?;
        for rel in &leftovers {
            self.files.remove(rel).await?;
        }
        info!(rows = removed, files = leftovers.len(), "cache purged");
        Ok(removed)
    }

    /// Reclaim expired resources and orphaned files.
    ///
    /// Returns the number of items reclaimed: expired resources removed
    /// plus orphaned files unlinked.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> CacheResult<usize> {
        let now = OffsetDateTime::now_utc();
        let expired = self.store.expired_as_of(now).await?;
        for resource in &expired {
            self.store.delete(resource.rid.as_str()).await?;
            if let Err(e) = self.files.remove(&resource.rpath).await {
                warn!(rpath = %resource.rpath, error = %e, "expired file unlink failed");
            }
        }

        let live = self.store.live_paths().await?;
        let orphans = self.files.scan_orphans(&live).await?;
        for rel in &orphans {
            debug!(rpath = %rel, "unlinking orphaned file");
            self.files.remove(rel).await?;
        }

        if !expired.is_empty() || !orphans.is_empty() {
            info!(
                expired = expired.len(),
                orphans = orphans.len(),
                "cleanup reclaimed items"
            );
        }
        Ok(expired.len() + orphans.len())
    }

    /// List resources matching a filter.
    pub async fn list_resources(&self, filter: &ListFilter) -> CacheResult<Vec<Resource>> {
        Ok(self.store.list(filter).await?)
    }

    /// Search resources by field value.
    pub async fn search(
        &self,
        query: &str,
        field: SearchField,
        exact: bool,
    ) -> CacheResult<Vec<Resource>> {
        Ok(self.store.search(query, field, exact).await?)
    }

    /// Aggregate cache statistics.
    pub async fn get_stats(&self) -> CacheResult<ResourceStats> {
        Ok(self.store.stats(OffsetDateTime::now_utc()).await?)
    }

    /// Verify one resource's file against its recorded checksum.
    pub async fn validate_resource(&self, rname: &str) -> CacheResult<()> {
        let resource = self
            .store
            .get_by_name(rname)
            .await?
            .ok_or_else(|| CacheError::NotFound(rname.to_string()))?;
        verify_checksum(&self.files, &resource).await
    }

    /// Verify every resource's file against its recorded checksum.
    ///
    /// Returns `(valid, invalid)` counts. A resource without a recorded
    /// checksum counts as valid; a missing file counts as invalid.
    #[instrument(skip(self))]
    pub async fn verify_cache(&self) -> CacheResult<(usize, usize)> {
        let resources = self.store.list(&ListFilter::default()).await?;
        let mut valid = 0usize;
        let mut invalid = 0usize;
        for resource in &resources {
            match verify_checksum(&self.files, resource).await {
                Ok(()) => valid += 1,
                Err(CacheError::Corruption { rname, .. }) => {
                    warn!(rname = %rname, "corrupt resource detected");
                    invalid += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((valid, invalid))
    }

    /// Export every metadata record as JSON at `path`. Cached files are not
    /// copied.
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub async fn export_metadata(&self, path: impl AsRef<Path>) -> CacheResult<()> {
        let snapshot = self.store.export_snapshot().await?;
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path.as_ref(), json).await?;
        Ok(())
    }

    /// Import metadata records from a JSON snapshot at `path`.
    ///
    /// The snapshot's schema version is validated before any write and the
    /// whole import commits in one transaction, so a rejected snapshot
    /// leaves the store untouched. Returns the number of records imported.
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub async fn import_metadata(&self, path: impl AsRef<Path>) -> CacheResult<u64> {
        let data = tokio::fs::read(path.as_ref()).await?;
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        Ok(self.store.import_snapshot(&snapshot).await?)
    }

    /// Close the cache, releasing the database handle.
    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn place_file(
        &self,
        source: &Path,
        rpath: &str,
        compress: bool,
        action: SourceAction,
    ) -> CacheResult<StoredObject> {
        match action {
            SourceAction::Copy => Ok(self.files.store(source, rpath, compress).await?),
            SourceAction::Move if compress => {
                // Compression re-encodes, so moving is copy-then-unlink.
                let stored = self.files.store(source, rpath, true).await?;
                tokio::fs::remove_file(source).await?;
                Ok(stored)
            }
            SourceAction::Move => Ok(self.files.rename_from(source, rpath).await?),
        }
    }

    /// Make room for `incoming` bytes under the configured quota.
    ///
    /// Under `EvictLru`, expired resources go first, then the least
    /// recently accessed live ones. The resource identified by
    /// `exempt_rid` is never evicted: an in-place update must not destroy
    /// the resource it is updating. A resource larger than the whole quota
    /// is rejected outright.
    async fn ensure_headroom(&self, incoming: u64, exempt_rid: Option<&str>) -> CacheResult<()> {
        let Some(quota) = self.config.quota_bytes else {
            return Ok(());
        };
        if incoming > quota {
            return Err(CacheError::OverQuota {
                needed: incoming,
                quota,
            });
        }

        let mut used = self.store.total_size().await?;
        if used + incoming <= quota {
            return Ok(());
        }

        if self.config.quota_policy == QuotaPolicy::Reject {
            return Err(CacheError::OverQuota {
                needed: used + incoming - quota,
                quota,
            });
        }

        let now = OffsetDateTime::now_utc();
        for resource in self.store.expired_as_of(now).await? {
            if Some(resource.rid.as_str()) == exempt_rid {
                continue;
            }
            self.store.delete(resource.rid.as_str()).await?;
            self.files.remove(&resource.rpath).await?;
            used = used.saturating_sub(resource.size_bytes.max(0) as u64);
            if used + incoming <= quota {
                return Ok(());
            }
        }

        for resource in self.store.lru_candidates(u32::MAX).await? {
            if Some(resource.rid.as_str()) == exempt_rid {
                continue;
            }
            info!(rname = %resource.rname, "evicting to satisfy quota");
            self.store.delete(resource.rid.as_str()).await?;
            self.files.remove(&resource.rpath).await?;
            used = used.saturating_sub(resource.size_bytes.max(0) as u64);
            if used + incoming <= quota {
                return Ok(());
            }
        }

        Err(CacheError::OverQuota {
            needed: used + incoming - quota,
            quota,
        })
    }
}

/// Destination filename for a cached file: the rid joined with the source
/// filename keeps paths unique while staying recognizable.
fn destination_name(rid: &str, source: &Path) -> String {
    match source.file_name() {
        Some(name) => format!("{rid}_{}", name.to_string_lossy()),
        None => rid.to_string(),
    }
}
