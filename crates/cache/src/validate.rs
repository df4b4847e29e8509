//! Integrity checks over cached files.

use crate::error::{CacheError, CacheResult};
use larder_metadata::Resource;
use larder_storage::{FileStore, StorageError};

/// Re-hash the stored file and compare it against the recorded checksum.
///
/// A resource without a recorded checksum passes trivially; a missing file
/// is reported as corruption, not as a lookup failure, because the metadata
/// row says the file should exist.
pub(crate) async fn verify_checksum(files: &FileStore, resource: &Resource) -> CacheResult<()> {
    let Some(expected) = &resource.checksum else {
        return Ok(());
    };

    let actual = match files.checksum(&resource.rpath).await {
        Ok(hash) => hash.to_hex(),
        Err(StorageError::NotFound(_)) => {
            return Err(CacheError::Corruption {
                rname: resource.rname.clone(),
                expected: expected.clone(),
                actual: "missing file".to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if &actual != expected {
        return Err(CacheError::Corruption {
            rname: resource.rname.clone(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}
