//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and how blobs are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root of the blob store.
    /// Default: <XDG data dir>/rstr
    #[serde(default = "StoreConfig::default_data_path")]
    pub data_path: PathBuf,

    /// Staging directory for uploads in flight.
    /// Default: unset, meaning `{data_path}/staging`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_directory: Option<PathBuf>,

    /// Directory levels (two hex chars each) above every blob.
    /// Default: 3
    #[serde(default = "StoreConfig::default_shard_depth")]
    pub shard_depth: usize,

    /// Write JSON sidecars with MIME type and filename.
    /// Default: true
    #[serde(default = "default_true")]
    pub store_metadata: bool,

    /// fsync uploads before acknowledging them.
    /// Default: true
    #[serde(default = "default_true")]
    pub fsync: bool,

    /// Refuse uploads and deletes.
    /// Default: false
    #[serde(default)]
    pub read_only: bool,

    /// Staging files older than this many seconds are purged at startup.
    /// Default: 3600
    #[serde(default = "StoreConfig::default_staging_max_age_secs")]
    pub staging_max_age_secs: u64,
}

impl StoreConfig {
    fn default_data_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_dir().join("rstr"))
            .unwrap_or_else(|| PathBuf::from(".rstr"))
    }

    fn default_shard_depth() -> usize {
        3
    }

    fn default_staging_max_age_secs() -> u64 {
        3600
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: Self::default_data_path(),
            tmp_directory: None,
            shard_depth: Self::default_shard_depth(),
            store_metadata: true,
            fsync: true,
            read_only: false,
            staging_max_age_secs: Self::default_staging_max_age_secs(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    /// Default: 127.0.0.1
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,

    /// Port to bind.
    /// Default: 3123
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    /// Upper bound on `GET /blobs` results when no `limit` is given.
    /// Default: 1000
    #[serde(default = "ServerConfig::default_list_limit")]
    pub list_limit: usize,
}

impl ServerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        3123
    }

    fn default_list_limit() -> usize {
        1000
    }

    /// `host:port`, ready for a listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            list_limit: Self::default_list_limit(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or a full directive).
    /// `RUST_LOG` takes precedence at runtime.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}
