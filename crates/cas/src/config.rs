//! Store configuration.
//!
//! Layout under `base_path`:
//! - `objects/`: committed blobs, sharded by digest prefix
//! - `metadata/`: optional JSON sidecars, same shard layout
//! - `staging/`: in-flight uploads (unless `staging_dir` points elsewhere)
//!
//! Default path: `<data dir>/rstr` (e.g. `~/.local/share/rstr`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CasError, Result};

/// Deepest supported shard nesting; four levels of 256 fan-out is plenty.
pub const MAX_SHARD_DEPTH: usize = 4;

/// Configuration for the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    /// Root directory of the store.
    pub base_path: PathBuf,

    /// Where uploads are staged before commit.
    /// `None` means `{base_path}/staging`, which keeps commits on one filesystem.
    pub staging_dir: Option<PathBuf>,

    /// Number of two-character directory levels above each blob.
    pub shard_depth: usize,

    /// Whether to write metadata JSON alongside objects.
    pub store_metadata: bool,

    /// fsync staged data and shard directories before reporting success.
    pub fsync: bool,

    /// Read-only mode - prevents any writes.
    pub read_only: bool,

    /// Staging files older than this are treated as crash leftovers.
    #[serde(with = "duration_secs")]
    pub staging_max_age: Duration,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            base_path: default_cas_path(),
            staging_dir: None,
            shard_depth: 3,
            store_metadata: true,
            fsync: true,
            read_only: false,
            staging_max_age: Duration::from_secs(3600),
        }
    }
}

/// Get the default store path (`<data dir>/rstr`).
fn default_cas_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.data_dir().join("rstr"))
        .unwrap_or_else(|| PathBuf::from(".rstr"))
}

impl CasConfig {
    /// Create a config with a specific base path.
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            ..Self::default()
        }
    }

    /// Create a read-only config with a specific base path.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            store_metadata: false,
            read_only: true,
            ..Self::default()
        }
    }

    /// Reject settings the store cannot honor.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SHARD_DEPTH).contains(&self.shard_depth) {
            return Err(CasError::InvalidConfig(format!(
                "shard_depth must be between 1 and {}, got {}",
                MAX_SHARD_DEPTH, self.shard_depth
            )));
        }
        Ok(())
    }

    /// Get the objects directory path.
    pub fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    /// Get the metadata directory path.
    pub fn metadata_dir(&self) -> PathBuf {
        self.base_path.join("metadata")
    }

    /// Get the staging directory path.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.base_path.join("staging"))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
