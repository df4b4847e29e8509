//! Configuration types shared across crates.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Policy applied when an add/update would exceed the configured quota.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPolicy {
    /// Reject the operation with an over-quota error.
    #[default]
    Reject,
    /// Evict expired resources first, then least-recently-accessed ones,
    /// until the incoming resource fits.
    EvictLru,
}

/// Cache construction configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for cached files and the metadata database.
    /// Created if absent.
    pub cache_dir: PathBuf,
    /// How often expired-resource cleanup should run, in seconds.
    /// Advisory: consumed by schedulers external to the cache.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Optional maximum total size of live resources in bytes.
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    /// Whether newly added resources are compressed unless the caller says
    /// otherwise.
    #[serde(default)]
    pub compress_default: bool,
    /// Policy when the quota would be exceeded.
    #[serde(default)]
    pub quota_policy: QuotaPolicy,
    /// Regex pattern valid resource names must match.
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,
    /// Whether `get` re-hashes the stored file and compares it against the
    /// recorded checksum.
    #[serde(default)]
    pub verify_on_get: bool,
}

fn default_cleanup_interval_secs() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

fn default_name_pattern() -> String {
    "^[A-Za-z0-9_.-]+$".to_string()
}

impl CacheConfig {
    /// Create a configuration with defaults for the given cache root.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            quota_bytes: None,
            compress_default: false,
            quota_policy: QuotaPolicy::default(),
            name_pattern: default_name_pattern(),
            verify_on_get: false,
        }
    }

    /// Get the cleanup interval as a Duration.
    pub fn cleanup_interval(&self) -> Duration {
        let secs = i64::try_from(self.cleanup_interval_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Compile the resource-name pattern.
    pub fn compiled_name_pattern(&self) -> crate::Result<Regex> {
        Regex::new(&self.name_pattern)
            .map_err(|e| crate::Error::Config(format!("invalid name pattern: {e}")))
    }

    /// Validate a resource name against the configured pattern.
    pub fn validate_name(&self, pattern: &Regex, name: &str) -> crate::Result<()> {
        if pattern.is_match(name) {
            Ok(())
        } else {
            Err(crate::Error::InvalidName {
                name: name.to_string(),
                pattern: self.name_pattern.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_name_pattern() {
        let config = CacheConfig::new("/tmp/cache");
        let pattern = config.compiled_name_pattern().unwrap();

        assert!(config.validate_name(&pattern, "genome.fa").is_ok());
        assert!(config.validate_name(&pattern, "ref_2024-01").is_ok());
        assert!(config.validate_name(&pattern, "bad name").is_err());
        assert!(config.validate_name(&pattern, "").is_err());
        assert!(config.validate_name(&pattern, "a/b").is_err());
    }

    #[test]
    fn test_cleanup_interval_default() {
        let config = CacheConfig::new("/tmp/cache");
        assert_eq!(config.cleanup_interval(), Duration::days(30));
    }
}
