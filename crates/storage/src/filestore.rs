//! Filesystem-backed artifact store.

use crate::compression;
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use futures::Stream;
use larder_core::{ContentHash, DATABASE_FILENAME};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{instrument, warn};
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Prefix for in-flight staging files. Never visible as committed content
/// and skipped by the orphan scan.
const TMP_PREFIX: &str = ".tmp.";

/// A stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Result of placing an artifact: size and checksum of the bytes that
/// actually landed on disk (post-compression when compression is on).
#[derive(Debug, Clone, Copy)]
pub struct StoredObject {
    pub size_bytes: u64,
    pub checksum: ContentHash,
}

/// Stores physical artifacts under the cache root.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a new file store rooted at `root`, creating the directory if
    /// absent.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the full path for a relative key, rejecting path traversal.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(key))
    }

    /// Whether the artifact for `key` exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    /// Size in bytes of the stored artifact.
    pub async fn file_size(&self, key: &str) -> StorageResult<u64> {
        let path = self.key_path(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(meta.len())
    }

    /// Copy a source file into the cache root at `key`, optionally
    /// compressing it.
    ///
    /// The write is atomic: bytes go to a `.tmp.<uuid>` sibling which is
    /// fsynced and renamed into place, so a crash mid-write never leaves a
    /// partial file visible under the final name. The returned checksum and
    /// size describe the final on-disk bytes.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn store(
        &self,
        source: impl AsRef<Path> + std::fmt::Debug,
        key: &str,
        compress: bool,
    ) -> StorageResult<StoredObject> {
        let source = source.as_ref();
        let mut file = fs::File::open(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::SourceMissing(source.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        if compress {
            // Compressed output is buffered so the checksum covers the exact
            // bytes written to disk.
            let mut data = Vec::new();
            file.read_to_end(&mut data).await?;
            let compressed = compression::compress(&data).await?;
            self.write_atomic(key, &compressed).await?;
            Ok(StoredObject {
                size_bytes: compressed.len() as u64,
                checksum: ContentHash::compute(&compressed),
            })
        } else {
            // Uncompressed sources stream straight through the hasher.
            let (temp_path, final_path) = self.temp_paths(key)?;
            let mut hasher = ContentHash::hasher();
            let mut size_bytes = 0u64;
            let result: StorageResult<()> = async {
                let mut out = fs::File::create(&temp_path).await?;
                let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
                loop {
                    let n = file.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    out.write_all(&buf[..n]).await?;
                    size_bytes += n as u64;
                }
                out.sync_all().await?;
                Ok(())
            }
            .await;
            if let Err(e) = result {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
            fs::rename(&temp_path, &final_path).await?;
            Ok(StoredObject {
                size_bytes,
                checksum: hasher.finalize(),
            })
        }
    }

    /// Place an in-memory buffer at `key` with the same atomicity and
    /// checksum contract as [`store`](Self::store).
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    pub async fn store_bytes(
        &self,
        data: &[u8],
        key: &str,
        compress: bool,
    ) -> StorageResult<StoredObject> {
        let on_disk = if compress {
            compression::compress(data).await?
        } else {
            Bytes::copy_from_slice(data)
        };
        self.write_atomic(key, &on_disk).await?;
        Ok(StoredObject {
            size_bytes: on_disk.len() as u64,
            checksum: ContentHash::compute(&on_disk),
        })
    }

    /// Move a source file into the cache root at `key`.
    ///
    /// Uses rename when source and root share a filesystem, falling back to
    /// copy-then-unlink across devices. Only valid for uncompressed
    /// placement; compression always re-encodes via [`store`](Self::store).
    #[instrument(skip(self), fields(key = %key))]
    pub async fn rename_from(
        &self,
        source: impl AsRef<Path> + std::fmt::Debug,
        key: &str,
    ) -> StorageResult<StoredObject> {
        let source = source.as_ref();
        let final_path = self.key_path(key)?;

        match fs::rename(source, &final_path).await {
            Ok(()) => {
                let size_bytes = self.file_size(key).await?;
                let checksum = self.checksum(key).await?;
                Ok(StoredObject {
                    size_bytes,
                    checksum,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::SourceMissing(source.display().to_string()))
            }
            // EXDEV and friends: fall back to an atomic copy then unlink.
            Err(_) => {
                let stored = self.store(source, key, false).await?;
                fs::remove_file(source).await?;
                Ok(stored)
            }
        }
    }

    /// Read the artifact back, decompressing transparently when the caller
    /// says the resource was stored compressed.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn retrieve(&self, key: &str, compressed: bool) -> StorageResult<Bytes> {
        let path = self.key_path(key)?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        if compressed {
            Ok(compression::decompress(&data).await?)
        } else {
            Ok(Bytes::from(data))
        }
    }

    /// Stream the raw on-disk bytes of the artifact in chunks.
    pub async fn retrieve_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_path(key)?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    /// Compute the checksum of the stored artifact's on-disk bytes.
    pub async fn checksum(&self, key: &str) -> StorageResult<ContentHash> {
        let path = self.key_path(key)?;
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        let mut hasher = ContentHash::hasher();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Unlink the artifact at `key`.
    ///
    /// Idempotent: an already-absent file is logged and treated as success,
    /// so `remove`/`cleanup` can be retried safely.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key = %key, "file already absent on remove");
                Ok(())
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// List files under the cache root that are not in `known_paths`.
    ///
    /// The metadata database (and its WAL/shm side files) and in-flight
    /// `.tmp.` staging files are never reported.
    #[instrument(skip(self, known_paths))]
    pub async fn scan_orphans(
        &self,
        known_paths: &HashSet<String>,
    ) -> StorageResult<Vec<String>> {
        let mut orphans = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks; links are ignored so
                // the scan never reaches outside the root.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    let Ok(rel) = path.strip_prefix(&self.root) else {
                        continue;
                    };
                    let rel = rel.to_string_lossy().to_string();
                    if Self::is_internal_file(&rel) || known_paths.contains(&rel) {
                        continue;
                    }
                    orphans.push(rel);
                }
            }
        }

        Ok(orphans)
    }

    fn is_internal_file(rel: &str) -> bool {
        let name = Path::new(rel)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        name.starts_with(DATABASE_FILENAME) || name.starts_with(TMP_PREFIX)
    }

    fn temp_paths(&self, key: &str) -> StorageResult<(PathBuf, PathBuf)> {
        let final_path = self.key_path(key)?;
        let temp_name = format!(
            "{TMP_PREFIX}{}.{}",
            final_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            Uuid::new_v4()
        );
        let temp_path = final_path.with_file_name(temp_name);
        Ok((temp_path, final_path))
    }

    async fn write_atomic(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let (temp_path, final_path) = self.temp_paths(key)?;
        let result: StorageResult<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        fs::rename(&temp_path, &final_path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_retrieve_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let src = src_dir.path().join("input.txt");
        fs::write(&src, b"hello world").await.unwrap();

        let stored = store.store(&src, "BFC1", false).await.unwrap();
        assert_eq!(stored.size_bytes, 11);
        assert_eq!(stored.checksum, ContentHash::compute(b"hello world"));

        let data = store.retrieve("BFC1", false).await.unwrap();
        assert_eq!(data.as_ref(), b"hello world");
        // Source stays in place on copy
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_store_compressed_checksum_covers_disk_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let payload = b"abcabcabc".repeat(200);
        let stored = store.store_bytes(&payload, "BFC2", true).await.unwrap();
        assert!(stored.size_bytes < payload.len() as u64);

        // The recorded checksum matches the raw file, not the content
        let on_disk = fs::read(dir.path().join("BFC2")).await.unwrap();
        assert_eq!(stored.checksum, ContentHash::compute(&on_disk));

        let restored = store.retrieve("BFC2", true).await.unwrap();
        assert_eq!(restored.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn test_missing_source_is_source_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let err = store
            .store("/nonexistent/input", "BFC3", false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        store.store_bytes(b"x", "BFC4", false).await.unwrap();
        store.remove("BFC4").await.unwrap();
        assert!(!store.exists("BFC4").await.unwrap());
        // Second remove succeeds silently
        store.remove("BFC4").await.unwrap();
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        assert!(store.exists("../escape").await.is_err());
        assert!(store.exists("/absolute/path").await.is_err());
        assert!(store.exists("foo/../bar").await.is_err());
        assert!(store.exists("nested/key").await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_orphans_skips_known_and_internal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        store.store_bytes(b"a", "BFC5", false).await.unwrap();
        store.store_bytes(b"b", "stray", false).await.unwrap();
        fs::write(dir.path().join(DATABASE_FILENAME), b"db").await.unwrap();
        fs::write(dir.path().join(".tmp.BFC9.x"), b"partial").await.unwrap();

        let known: HashSet<String> = ["BFC5".to_string()].into_iter().collect();
        let orphans = store.scan_orphans(&known).await.unwrap();
        assert_eq!(orphans, vec!["stray".to_string()]);
    }

    #[tokio::test]
    async fn test_rename_from_moves_source() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let src = src_dir.path().join("movable");
        fs::write(&src, b"move me").await.unwrap();

        let stored = store.rename_from(&src, "BFC6").await.unwrap();
        assert_eq!(stored.size_bytes, 7);
        assert!(!src.exists());
        assert_eq!(
            store.retrieve("BFC6", false).await.unwrap().as_ref(),
            b"move me"
        );
    }
}
