//! Tracing initialization for rstr.
//!
//! Logs go to stderr through the fmt layer. `RUST_LOG` wins over the
//! configured level when set.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` if present, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("Invalid log level {:?}", default_level)),
    }
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init(default_level: &str) -> Result<()> {
    let env_filter = env_filter(default_level)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
