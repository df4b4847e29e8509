//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    ListFilter, NewResource, Resource, ResourceRow, ResourceStats, ResourceUpdate, SearchField,
};
use crate::repos::snapshot::{Snapshot, SnapshotResource};
use crate::repos::{IdRepo, ResourceRepo, SnapshotRepo};
use async_trait::async_trait;
use larder_core::{ResourceId, SCHEMA_VERSION};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, instrument};

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: IdRepo + ResourceRepo + SnapshotRepo + Send + Sync {
    /// Create or migrate the database schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the metadata database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures when several
            // tasks hit the cache at once.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        MetadataStore::migrate(&store).await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool, releasing the database handle.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn tags_for(&self, resource_id: i64) -> MetadataResult<BTreeSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT tag FROM resource_tags WHERE resource_id = ? ORDER BY tag")
                .bind(resource_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn materialize(&self, row: ResourceRow) -> MetadataResult<Resource> {
        let tags = self.tags_for(row.id).await?;
        Ok(Resource::from_row(row, tags))
    }

    async fn materialize_all(&self, rows: Vec<ResourceRow>) -> MetadataResult<Vec<Resource>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.materialize(row).await?);
        }
        Ok(out)
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Reference-format databases predate the checksum/size/compression
        // columns. SQLite has no ADD COLUMN IF NOT EXISTS, so check first.
        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='resource')",
        )
        .fetch_one(&self.pool)
        .await?;

        if table_exists {
            let columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
                sqlx::query_as("PRAGMA table_info(resource)")
                    .fetch_all(&self.pool)
                    .await?;
            let column_names: HashSet<&str> =
                columns.iter().map(|(_, name, _, _, _, _)| name.as_str()).collect();

            for (column, decl) in [
                ("checksum", "ALTER TABLE resource ADD COLUMN checksum TEXT"),
                (
                    "size_bytes",
                    "ALTER TABLE resource ADD COLUMN size_bytes INTEGER NOT NULL DEFAULT 0",
                ),
                (
                    "compressed",
                    "ALTER TABLE resource ADD COLUMN compressed INTEGER NOT NULL DEFAULT 0",
                ),
            ] {
                if !column_names.contains(column) {
                    debug!(column, "adding missing column to resource table");
                    sqlx::query(decl).execute(&self.pool).await?;
                }
            }
        }

        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IdRepo for SqliteStore {
    async fn next_rid(&self) -> MetadataResult<ResourceId> {
        let mut tx = self.pool.begin().await?;

        let current: i64 = sqlx::query_scalar("SELECT next_rid FROM id_counter WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        if current == i64::MAX {
            return Err(MetadataError::IdExhausted);
        }

        sqlx::query("UPDATE id_counter SET next_rid = next_rid + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(ResourceId::from_counter(current))
    }
}

#[async_trait]
impl ResourceRepo for SqliteStore {
    #[instrument(skip(self, new), fields(rid = %new.rid, rname = %new.rname))]
    async fn create(&self, new: &NewResource) -> MetadataResult<Resource> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM resource WHERE rname = ?")
            .bind(&new.rname)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(MetadataError::AlreadyExists(format!(
                "rname '{}'",
                new.rname
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO resource (
                rid, rname, create_time, access_time, last_modified_time,
                rpath, rtype, fpath, etag, expires, checksum, size_bytes, compressed
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.rid.as_str())
        .bind(&new.rname)
        .bind(now)
        .bind(now)
        .bind(Option::<OffsetDateTime>::None)
        .bind(&new.rpath)
        .bind(new.rtype.as_str())
        .bind(&new.fpath)
        .bind(&new.etag)
        .bind(new.expires)
        .bind(&new.checksum)
        .bind(new.size_bytes)
        .bind(new.compressed)
        .execute(&mut *tx)
        .await
        .map_err(|e| MetadataError::from_unique_violation(e, "rname", &new.rname))?;

        let resource_id = result.last_insert_rowid();
        for tag in &new.tags {
            sqlx::query("INSERT INTO resource_tags (resource_id, tag) VALUES (?, ?)")
                .bind(resource_id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Resource {
            rid: new.rid.clone(),
            rname: new.rname.clone(),
            create_time: now,
            access_time: now,
            last_modified_time: None,
            rpath: new.rpath.clone(),
            rtype: new.rtype.as_str().to_string(),
            fpath: new.fpath.clone(),
            etag: new.etag.clone(),
            expires: new.expires,
            checksum: new.checksum.clone(),
            size_bytes: new.size_bytes,
            compressed: new.compressed,
            tags: new.tags.clone(),
        })
    }

    async fn get_by_name(&self, rname: &str) -> MetadataResult<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE rname = ?")
            .bind(rname)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.materialize(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_by_rid(&self, rid: &str) -> MetadataResult<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE rid = ?")
            .bind(rid)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.materialize(row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, update), fields(rid = %rid))]
    async fn update(&self, rid: &str, update: &ResourceUpdate) -> MetadataResult<Resource> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE rid = ?")
            .bind(rid)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("rid '{rid}'")))?;

        let access_time = update.access_time.unwrap_or(row.access_time);
        let last_modified_time = update.last_modified_time.or(row.last_modified_time);
        let checksum = update.checksum.clone().or(row.checksum);
        let etag = match &update.etag {
            Some(v) => v.clone(),
            None => row.etag,
        };
        let expires = match update.expires {
            Some(v) => v,
            None => row.expires,
        };
        let size_bytes = update.size_bytes.unwrap_or(row.size_bytes);
        let compressed = update.compressed.unwrap_or(row.compressed);

        sqlx::query(
            r#"
            UPDATE resource
            SET access_time = ?, last_modified_time = ?, checksum = ?, etag = ?,
                expires = ?, size_bytes = ?, compressed = ?
            WHERE rid = ?
            "#,
        )
        .bind(access_time)
        .bind(last_modified_time)
        .bind(&checksum)
        .bind(&etag)
        .bind(expires)
        .bind(size_bytes)
        .bind(compressed)
        .bind(rid)
        .execute(&mut *tx)
        .await?;

        let tags = if let Some(new_tags) = &update.tags {
            sqlx::query("DELETE FROM resource_tags WHERE resource_id = ?")
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
            for tag in new_tags {
                sqlx::query("INSERT INTO resource_tags (resource_id, tag) VALUES (?, ?)")
                    .bind(row.id)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await?;
            }
            new_tags.clone()
        } else {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT tag FROM resource_tags WHERE resource_id = ? ORDER BY tag")
                    .bind(row.id)
                    .fetch_all(&mut *tx)
                    .await?;
            rows.into_iter().map(|(t,)| t).collect()
        };

        tx.commit().await?;

        Ok(Resource {
            rid: ResourceId::from(row.rid),
            rname: row.rname,
            create_time: row.create_time,
            access_time,
            last_modified_time,
            rpath: row.rpath,
            rtype: row.rtype,
            fpath: row.fpath,
            etag,
            expires,
            checksum,
            size_bytes,
            compressed,
            tags,
        })
    }

    async fn touch_access(&self, rname: &str, at: OffsetDateTime) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE resource SET access_time = ? WHERE rname = ?")
            .bind(at)
            .bind(rname)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("rname '{rname}'")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(rid = %rid))]
    async fn delete(&self, rid: &str) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM resource WHERE rid = ?")
            .bind(rid)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((resource_id,)) = existing else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM resource_tags WHERE resource_id = ?")
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM resource WHERE id = ?")
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_all(&self) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM resource_tags")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM resource").execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn list(&self, filter: &ListFilter) -> MetadataResult<Vec<Resource>> {
        let rows = match &filter.tag {
            Some(tag) => {
                sqlx::query_as::<_, ResourceRow>(
                    r#"
                    SELECT r.* FROM resource r
                    JOIN resource_tags t ON t.resource_id = r.id
                    WHERE t.tag = ?
                    ORDER BY r.id
                    "#,
                )
                .bind(tag)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let now = OffsetDateTime::now_utc();
        let resources = self.materialize_all(rows).await?;
        Ok(resources
            .into_iter()
            .filter(|r| match &filter.rtype {
                Some(rtype) => r.rtype == rtype.as_str(),
                None => true,
            })
            .filter(|r| match filter.expired {
                Some(expired) => r.is_expired(now) == expired,
                None => true,
            })
            .collect())
    }

    async fn search(
        &self,
        query: &str,
        field: SearchField,
        exact: bool,
    ) -> MetadataResult<Vec<Resource>> {
        let column = match field {
            SearchField::Name => "rname",
            SearchField::Rid => "rid",
            SearchField::Path => "rpath",
            SearchField::Tag => {
                let sql = if exact {
                    "SELECT DISTINCT r.* FROM resource r \
                     JOIN resource_tags t ON t.resource_id = r.id \
                     WHERE t.tag = ? ORDER BY r.id"
                } else {
                    "SELECT DISTINCT r.* FROM resource r \
                     JOIN resource_tags t ON t.resource_id = r.id \
                     WHERE t.tag LIKE ? ORDER BY r.id"
                };
                let bound = if exact {
                    query.to_string()
                } else {
                    format!("%{query}%")
                };
                let rows = sqlx::query_as::<_, ResourceRow>(sql)
                    .bind(bound)
                    .fetch_all(&self.pool)
                    .await?;
                return self.materialize_all(rows).await;
            }
        };

        let sql = if exact {
            format!("SELECT * FROM resource WHERE {column} = ? ORDER BY id")
        } else {
            format!("SELECT * FROM resource WHERE {column} LIKE ? ORDER BY id")
        };
        let bound = if exact {
            query.to_string()
        } else {
            format!("%{query}%")
        };

        let rows = sqlx::query_as::<_, ResourceRow>(&sql)
            .bind(bound)
            .fetch_all(&self.pool)
            .await?;
        self.materialize_all(rows).await
    }

    async fn expired_as_of(&self, now: OffsetDateTime) -> MetadataResult<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resource WHERE expires IS NOT NULL AND expires <= ? ORDER BY id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        self.materialize_all(rows).await
    }

    async fn lru_candidates(&self, limit: u32) -> MetadataResult<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resource ORDER BY access_time ASC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        self.materialize_all(rows).await
    }

    async fn live_paths(&self) -> MetadataResult<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT rpath FROM resource")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    async fn total_size(&self) -> MetadataResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM resource")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.max(0) as u64)
    }

    async fn stats(&self, now: OffsetDateTime) -> MetadataResult<ResourceStats> {
        let (count, total_size): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM resource")
                .fetch_one(&self.pool)
                .await?;

        let expired: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM resource WHERE expires IS NOT NULL AND expires <= ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let (oldest, newest): (Option<OffsetDateTime>, Option<OffsetDateTime>) =
            sqlx::query_as("SELECT MIN(create_time), MAX(create_time) FROM resource")
                .fetch_one(&self.pool)
                .await?;

        let tag_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT tag, COUNT(*) FROM resource_tags GROUP BY tag ORDER BY tag",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ResourceStats {
            count: count as u64,
            cache_size_bytes: total_size.max(0) as u64,
            expired_count: expired as u64,
            oldest,
            newest,
            tag_distribution: tag_rows
                .into_iter()
                .map(|(tag, n)| (tag, n as u64))
                .collect(),
        })
    }
}

#[async_trait]
impl SnapshotRepo for SqliteStore {
    async fn export_snapshot(&self) -> MetadataResult<Snapshot> {
        let rows = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut resources = Vec::with_capacity(rows.len());
        for row in rows {
            let tags = self.tags_for(row.id).await?;
            resources.push(SnapshotResource {
                rid: row.rid,
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
            });
        }

        Ok(Snapshot {
            schema_version: SCHEMA_VERSION.to_string(),
            exported_at: OffsetDateTime::now_utc(),
            resources,
        })
    }

    #[instrument(skip(self, snapshot), fields(resources = snapshot.resources.len()))]
    async fn import_snapshot(&self, snapshot: &Snapshot) -> MetadataResult<u64> {
        // Version gate before any write: an unrecognized snapshot must not
        // mutate the existing store.
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(MetadataError::SchemaVersion {
                found: snapshot.schema_version.clone(),
                expected: SCHEMA_VERSION.to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        let mut max_counter: i64 = 0;

        for res in &snapshot.resources {
            let result = sqlx::query(
                r#"
                INSERT INTO resource (
                    rid, rname, create_time, access_time, last_modified_time,
                    rpath, rtype, fpath, etag, expires, checksum, size_bytes, compressed
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&res.rid)
            .bind(&res.rname)
            .bind(res.create_time)
            .bind(res.access_time)
            .bind(res.last_modified_time)
            .bind(&res.rpath)
            .bind(&res.rtype)
            .bind(&res.fpath)
            .bind(&res.etag)
            .bind(res.expires)
            .bind(&res.checksum)
            .bind(res.size_bytes)
            .bind(res.compressed)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_unique_violation(e, "rname", &res.rname))?;

            let resource_id = result.last_insert_rowid();
            for tag in &res.tags {
                sqlx::query("INSERT INTO resource_tags (resource_id, tag) VALUES (?, ?)")
                    .bind(resource_id)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await?;
            }

            if let Some(counter) = ResourceId::from(res.rid.clone()).counter() {
                max_counter = max_counter.max(counter);
            }
        }

        // Keep id generation ahead of every imported rid.
        if max_counter > 0 && max_counter < i64::MAX {
            sqlx::query("UPDATE id_counter SET next_rid = MAX(next_rid, ?) WHERE id = 1")
                .bind(max_counter + 1)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(snapshot.resources.len() as u64)
    }
}

const SCHEMA_SQL: &str = r#"
-- Reference-format key/value metadata
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT
);
INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '0.99.4');
INSERT OR IGNORE INTO metadata (key, value) VALUES ('package', 'larder');

-- Resource records (reference column names; checksum/size_bytes/compressed
-- are additive columns)
CREATE TABLE IF NOT EXISTS resource (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rid TEXT NOT NULL UNIQUE,
    rname TEXT NOT NULL UNIQUE,
    create_time TEXT NOT NULL,
    access_time TEXT NOT NULL,
    last_modified_time TEXT,
    rpath TEXT NOT NULL,
    rtype TEXT NOT NULL DEFAULT 'local',
    fpath TEXT,
    etag TEXT,
    expires TEXT,
    checksum TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    compressed INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_resource_rid ON resource(rid);
CREATE INDEX IF NOT EXISTS idx_resource_rname ON resource(rname);
CREATE INDEX IF NOT EXISTS idx_resource_expires ON resource(expires);

-- Many-to-many tag relation
CREATE TABLE IF NOT EXISTS resource_tags (
    resource_id INTEGER NOT NULL REFERENCES resource(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (resource_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_resource_tags_tag ON resource_tags(tag);

-- Single-row counter feeding rid generation
CREATE TABLE IF NOT EXISTS id_counter (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    next_rid INTEGER NOT NULL
);
INSERT OR IGNORE INTO id_counter (id, next_rid) VALUES (1, 1);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceType;
    use larder_core::DATABASE_FILENAME;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteStore {
        SqliteStore::new(dir.path().join(DATABASE_FILENAME))
            .await
            .unwrap()
    }

    fn sample(rid: ResourceId, rname: &str) -> NewResource {
        NewResource {
            rid,
            rname: rname.to_string(),
            rpath: format!("{rname}.bin"),
            rtype: ResourceType::Local,
            fpath: Some(format!("/tmp/{rname}")),
            etag: None,
            expires: None,
            checksum: Some("ab".repeat(32)),
            size_bytes: 42,
            compressed: false,
            tags: BTreeSet::from(["genomics".to_string()]),
        }
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let rid = store.next_rid().await.unwrap();
        assert_eq!(rid.as_str(), "BFC1");

        let created = store.create(&sample(rid.clone(), "genome.fa")).await.unwrap();
        assert_eq!(created.rname, "genome.fa");
        assert!(created.tags.contains("genomics"));

        let by_name = store.get_by_name("genome.fa").await.unwrap().unwrap();
        assert_eq!(by_name.rid, rid);
        assert_eq!(by_name.size_bytes, 42);

        let by_rid = store.get_by_rid("BFC1").await.unwrap().unwrap();
        assert_eq!(by_rid.rname, "genome.fa");

        assert!(store.get_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let rid = store.next_rid().await.unwrap();
        store.create(&sample(rid, "dup")).await.unwrap();

        let rid2 = store.next_rid().await.unwrap();
        let err = store.create(&sample(rid2, "dup")).await.unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn rid_counter_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            assert_eq!(store.next_rid().await.unwrap().as_str(), "BFC1");
            assert_eq!(store.next_rid().await.unwrap().as_str(), "BFC2");
            store.close().await;
        }

        let store = open_store(&dir).await;
        assert_eq!(store.next_rid().await.unwrap().as_str(), "BFC3");
    }

    #[tokio::test]
    async fn update_is_partial_and_can_clear() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let rid = store.next_rid().await.unwrap();
        let mut new = sample(rid.clone(), "mutable");
        new.etag = Some("v1".to_string());
        let created = store.create(&new).await.unwrap();

        let updated = store
            .update(
                rid.as_str(),
                &ResourceUpdate {
                    size_bytes: Some(99),
                    etag: Some(None),
                    tags: Some(BTreeSet::from(["fresh".to_string()])),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.rid, rid);
        assert_eq!(updated.create_time, created.create_time);
        assert_eq!(updated.size_bytes, 99);
        assert_eq!(updated.etag, None);
        assert_eq!(updated.rname, "mutable");
        assert_eq!(updated.tags, BTreeSet::from(["fresh".to_string()]));

        let err = store
            .update("BFC999", &ResourceUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_and_delete_all() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        for name in ["a", "b", "c"] {
            let rid = store.next_rid().await.unwrap();
            store.create(&sample(rid, name)).await.unwrap();
        }

        assert!(store.delete("BFC2").await.unwrap());
        assert!(!store.delete("BFC2").await.unwrap());
        assert!(store.get_by_rid("BFC2").await.unwrap().is_none());

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert!(store.list(&ListFilter::default()).await.unwrap().is_empty());

        // Ids are never reused, even after a full purge.
        assert_eq!(store.next_rid().await.unwrap().as_str(), "BFC4");
    }

    #[tokio::test]
    async fn list_filters_by_tag_and_expiry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let now = OffsetDateTime::now_utc();

        let rid = store.next_rid().await.unwrap();
        let mut stale = sample(rid, "stale");
        stale.expires = Some(now - time::Duration::hours(1));
        stale.tags = BTreeSet::from(["old".to_string()]);
        store.create(&stale).await.unwrap();

        let rid = store.next_rid().await.unwrap();
        store.create(&sample(rid, "live")).await.unwrap();

        let tagged = store
            .list(&ListFilter {
                tag: Some("genomics".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].rname, "live");

        let expired = store
            .list(&ListFilter {
                expired: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].rname, "stale");

        let swept = store.expired_as_of(now).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].rname, "stale");
    }

    #[tokio::test]
    async fn search_substring_and_exact() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        for name in ["genome.fa", "genome.fa.fai", "reads.bam"] {
            let rid = store.next_rid().await.unwrap();
            store.create(&sample(rid, name)).await.unwrap();
        }

        let partial = store
            .search("genome", SearchField::Name, false)
            .await
            .unwrap();
        assert_eq!(partial.len(), 2);

        let exact = store
            .search("genome.fa", SearchField::Name, true)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].rname, "genome.fa");

        let by_tag = store
            .search("genom", SearchField::Tag, false)
            .await
            .unwrap();
        assert_eq!(by_tag.len(), 3);
    }

    #[tokio::test]
    async fn lru_order_and_sizes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let now = OffsetDateTime::now_utc();

        for name in ["first", "second"] {
            let rid = store.next_rid().await.unwrap();
            store.create(&sample(rid, name)).await.unwrap();
        }
        store
            .touch_access("first", now + time::Duration::hours(1))
            .await
            .unwrap();

        let lru = store.lru_candidates(10).await.unwrap();
        assert_eq!(lru[0].rname, "second");

        assert_eq!(store.total_size().await.unwrap(), 84);
        let paths = store.live_paths().await.unwrap();
        assert!(paths.contains("first.bin") && paths.contains("second.bin"));
    }

    #[tokio::test]
    async fn stats_aggregates() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let now = OffsetDateTime::now_utc();

        let rid = store.next_rid().await.unwrap();
        let mut expired = sample(rid, "expired");
        expired.expires = Some(now - time::Duration::minutes(5));
        store.create(&expired).await.unwrap();

        let rid = store.next_rid().await.unwrap();
        store.create(&sample(rid, "live")).await.unwrap();

        let stats = store.stats(now).await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.cache_size_bytes, 84);
        assert_eq!(stats.expired_count, 1);
        assert!(stats.oldest.is_some() && stats.newest.is_some());
        assert_eq!(stats.tag_distribution, vec![("genomics".to_string(), 2)]);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_raises_rid_floor() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        for name in ["a", "b"] {
            let rid = store.next_rid().await.unwrap();
            store.create(&sample(rid, name)).await.unwrap();
        }
        let snapshot = store.export_snapshot().await.unwrap();
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        assert_eq!(snapshot.resources.len(), 2);

        let dir2 = TempDir::new().unwrap();
        let fresh = open_store(&dir2).await;
        assert_eq!(fresh.import_snapshot(&snapshot).await.unwrap(), 2);

        let restored = fresh.get_by_name("b").await.unwrap().unwrap();
        assert_eq!(restored.rid.as_str(), "BFC2");
        assert!(restored.tags.contains("genomics"));

        // New ids start above every imported one.
        assert_eq!(fresh.next_rid().await.unwrap().as_str(), "BFC3");
    }

    #[tokio::test]
    async fn snapshot_import_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let mut snapshot = store.export_snapshot().await.unwrap();
        snapshot.schema_version = "9.9.9".to_string();
        snapshot.resources.push(SnapshotResource {
            rid: "BFC1".to_string(),
            rname: "ghost".to_string(),
            create_time: OffsetDateTime::now_utc(),
            access_time: OffsetDateTime::now_utc(),
            last_modified_time: None,
            rpath: "ghost.bin".to_string(),
            rtype: "local".to_string(),
            fpath: None,
            etag: None,
            expires: None,
            checksum: None,
            size_bytes: 1,
            compressed: false,
            tags: BTreeSet::new(),
        });

        let err = store.import_snapshot(&snapshot).await.unwrap_err();
        assert!(matches!(err, MetadataError::SchemaVersion { .. }));
        assert!(store.get_by_name("ghost").await.unwrap().is_none());
    }
}
