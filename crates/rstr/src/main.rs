//! rstr - content addressable blob store
//!
//! Subcommands:
//! - `rstr serve` - Run the HTTP server
//! - `rstr add <path>...` - Import files into the store
//! - `rstr check <ref>...` - Report whether blobs are stored
//! - `rstr delete <ref>...` - Remove blobs
//! - `rstr verify` - Re-hash every blob
//! - `rstr create-config` - Write a default config file

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cas::FileStore;
use clap::{Parser, Subcommand};
use rstr::{commands, config::cas_config, serve, telemetry};
use rstrconf::RstrConfig;

#[derive(Parser)]
#[command(name = "rstr")]
#[command(about = "Content addressable blob store with a web interface")]
#[command(version)]
struct Cli {
    /// Config file to load instead of ./rstr.toml
    #[arg(short, long, env = "RSTR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Blob store directory (overrides config and RSTR_DATA_PATH)
    #[arg(short, long, global = true)]
    data_store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Staging directory for uploads in flight
        #[arg(long)]
        tmp_directory: Option<PathBuf>,

        /// Log level or filter directives (RUST_LOG wins)
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Import files, descending into directories
    Add {
        /// Files or directories to import
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Parallel import workers
        #[arg(short, long, default_value = "16")]
        threads: usize,

        /// Print `<hash>\t<path>` for every imported file
        #[arg(short, long)]
        verbose: bool,
    },

    /// Report whether blobs are stored
    Check {
        /// Blob references (hex digests)
        #[arg(required = true)]
        refs: Vec<String>,

        /// Also print size, MIME type, filename and creation time
        #[arg(short, long)]
        metadata: bool,
    },

    /// Remove blobs
    Delete {
        /// Blob references (hex digests)
        #[arg(required = true)]
        refs: Vec<String>,

        /// Ask before deleting each blob
        #[arg(short = 'I', long)]
        interactive: bool,
    },

    /// Re-hash every stored blob and report corruption
    Verify,

    /// Write the effective configuration as a TOML file
    CreateConfig {
        /// Destination (default: ~/.config/rstr/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (mut config, sources) = RstrConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(data_store) = cli.data_store {
        config.store.data_path = data_store;
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            tmp_directory,
            log_level,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = tmp_directory {
                config.store.tmp_directory = Some(dir);
            }
            if let Some(level) = log_level {
                config.telemetry.log_level = level;
            }

            telemetry::init(&config.telemetry.log_level)?;
            serve::run(config, sources).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CreateConfig { path, force } => {
            let path = match path.or_else(rstrconf::user_config_file) {
                Some(path) => path,
                None => anyhow::bail!("No config directory found; pass --path"),
            };
            commands::create_config(&config, &path, force)?;
            println!("Wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        command => {
            telemetry::init("warn")?;
            let failures = tokio::task::spawn_blocking(move || run_offline(&config, command))
                .await
                .context("Command task failed")??;
            Ok(if failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Commands that work on the store directly, without a server.
fn run_offline(config: &RstrConfig, command: Commands) -> Result<usize> {
    let store = FileStore::new(cas_config(&config.store)).with_context(|| {
        format!(
            "Failed to open blob store at {}",
            config.store.data_path.display()
        )
    })?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Add {
            paths,
            threads,
            verbose,
        } => {
            let stderr = io::stderr();
            let mut err = stderr.lock();
            commands::add(&store, &paths, threads, verbose, &mut out, &mut err)
        }
        Commands::Check { refs, metadata } => commands::check(&store, &refs, metadata, &mut out),
        Commands::Delete { refs, interactive } => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let confirm = interactive.then_some(&mut input as &mut dyn BufRead);
            commands::delete(&store, &refs, confirm, &mut out)
        }
        Commands::Verify => commands::verify(&store, &mut out),
        Commands::Serve { .. } | Commands::CreateConfig { .. } => Ok(0),
    }
}
