//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, RstrConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

impl ConfigSources {
    /// One-line description for the startup banner.
    pub fn summary(&self) -> String {
        let files = if self.files.is_empty() {
            "defaults".to_string()
        } else {
            self.files
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        if self.env_overrides.is_empty() {
            files
        } else {
            format!("{} (env: {})", files, self.env_overrides.join(", "))
        }
    }
}

/// Discover config files, optionally with a CLI override path.
///
/// Returns paths in load order (system, user, local/cli). Standard
/// locations are only returned if they exist; an explicit `cli_path` is
/// always returned so a typo surfaces as a read error.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/rstr/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(user) = user_config_file() {
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("rstr.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Per-user config file: `$XDG_CONFIG_HOME/rstr/config.toml` or `~/.config/...`.
pub fn user_config_file() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("rstr").join("config.toml"))
}

/// Read a config file as a raw TOML table, checking it against the schema.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // Type errors are reported against the file that caused them.
    parse_table(table.clone(), path)?;
    Ok(table)
}

/// Deserialize a (possibly merged) table into a config with expanded paths.
pub fn parse_table(table: toml::Table, path: &Path) -> Result<RstrConfig, ConfigError> {
    let mut config: RstrConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

    config.store.data_path = expand_path(&config.store.data_path.to_string_lossy());
    config.store.tmp_directory = config
        .store
        .tmp_directory
        .map(|p| expand_path(&p.to_string_lossy()));
    Ok(config)
}

/// Recursively merge `overlay` into `base`; overlay keys win, sub-tables merge.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut RstrConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_env_overrides_from(config, sources, |key| env::var(key).ok())
}

/// Apply overrides from an arbitrary variable lookup.
pub fn apply_env_overrides_from(
    config: &mut RstrConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let mut take = |key: &str| {
        let value = lookup(key)?;
        sources.env_overrides.push(key.to_string());
        Some(value)
    };

    if let Some(v) = take("RSTR_DATA_PATH") {
        config.store.data_path = expand_path(&v);
    }
    if let Some(v) = take("RSTR_TMP_DIRECTORY") {
        config.store.tmp_directory = Some(expand_path(&v));
    }
    if let Some(v) = take("RSTR_READONLY") {
        config.store.read_only = parse_bool("RSTR_READONLY", &v)?;
    }
    if let Some(v) = take("RSTR_SHARD_DEPTH") {
        config.store.shard_depth = parse_number("RSTR_SHARD_DEPTH", &v)?;
    }
    if let Some(v) = take("RSTR_HOST") {
        config.server.host = v;
    }
    if let Some(v) = take("RSTR_PORT") {
        config.server.port = parse_number("RSTR_PORT", &v)?;
    }
    if let Some(v) = take("RSTR_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }

    Ok(())
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
            message: "expected a boolean".to_string(),
        }),
    }
}

fn parse_number<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        let (var_name, rest) = match stripped.find('/') {
            Some(slash_pos) => (&stripped[..slash_pos], Some(&stripped[slash_pos + 1..])),
            None => (stripped, None),
        };
        if let Ok(var_value) = env::var(var_name) {
            let base = PathBuf::from(var_value);
            return match rest {
                Some(rest) => base.join(rest),
                None => base,
            };
        }
    }
    PathBuf::from(path)
}
