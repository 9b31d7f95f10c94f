//! Configuration loading for rstr.
//!
//! Kept free of the store and server crates so anything can depend on it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rstrconf::RstrConfig;
//!
//! let config = RstrConfig::load().expect("Failed to load config");
//! println!("Blobs live in {}", config.store.data_path.display());
//! println!("Listening on {}", config.server.bind_addr());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/rstr/config.toml` (system)
//! 2. `~/.config/rstr/config.toml` (user)
//! 3. `./rstr.toml` (local override) or the `--config` path
//! 4. Environment variables (`RSTR_*`)
//!
//! Files are merged key by key, so a local file only needs the keys it changes.
//!
//! # Example Config
//!
//! ```toml
//! [store]
//! data_path = "~/.local/share/rstr"
//! shard_depth = 3
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3123
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod settings;

pub use loader::{
    discover_config_files_with_override, expand_path, user_config_file, ConfigSources,
};
pub use settings::{ServerConfig, StoreConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value {value:?} for {var}: {message}")]
    InvalidEnv {
        var: String,
        value: String,
        message: String,
    },
}

/// Complete rstr configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RstrConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RstrConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, with `config_path` replacing `./rstr.toml`, and
    /// report where the values came from.
    ///
    /// System and user configs still load first.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = Self::load_files(&files)?;
        loader::apply_env_overrides(&mut config, &mut sources)?;
        Ok((config, sources))
    }

    /// Merge the given files in order, without consulting the environment.
    pub fn load_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let origin = files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let config = loader::parse_table(merged, &origin)?;
        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually so the file carries comments
        let mut output = String::new();

        output.push_str("# rstr configuration\n");
        output.push_str("# Environment variables (RSTR_*) override these values.\n\n");

        output.push_str("[store]\n");
        output.push_str(&format!(
            "data_path = {}\n",
            toml_string(&self.store.data_path.to_string_lossy())
        ));
        match &self.store.tmp_directory {
            Some(dir) => output.push_str(&format!(
                "tmp_directory = {}\n",
                toml_string(&dir.to_string_lossy())
            )),
            None => output.push_str("# tmp_directory = \"/var/tmp/rstr\"  # default: <data_path>/staging\n"),
        }
        output.push_str(&format!("shard_depth = {}\n", self.store.shard_depth));
        output.push_str(&format!("store_metadata = {}\n", self.store.store_metadata));
        output.push_str(&format!("fsync = {}\n", self.store.fsync));
        output.push_str(&format!("read_only = {}\n", self.store.read_only));
        output.push_str(&format!(
            "staging_max_age_secs = {}\n",
            self.store.staging_max_age_secs
        ));

        output.push_str("\n[server]\n");
        output.push_str(&format!("host = {}\n", toml_string(&self.server.host)));
        output.push_str(&format!("port = {}\n", self.server.port));
        output.push_str(&format!("list_limit = {}\n", self.server.list_limit));

        output.push_str("\n[telemetry]\n");
        output.push_str("# RUST_LOG takes precedence when set\n");
        output.push_str(&format!(
            "log_level = {}\n",
            toml_string(&self.telemetry.log_level)
        ));

        output
    }
}

/// Quote a string for TOML.
fn toml_string(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}
