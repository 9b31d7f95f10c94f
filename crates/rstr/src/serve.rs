//! `rstr serve` - open the store and run the HTTP server.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use cas::FileStore;
use rstrconf::{ConfigSources, RstrConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::cas_config;
use crate::web::{self, AppState};

/// Open the store named by `config` and serve it until SIGINT or SIGTERM.
pub async fn run(config: RstrConfig, sources: ConfigSources) -> Result<()> {
    let cas = cas_config(&config.store);
    let data_path = cas.base_path.clone();
    let max_age = cas.staging_max_age;

    let store = tokio::task::spawn_blocking(move || -> Result<FileStore> {
        let store = FileStore::open_indexed(cas)
            .with_context(|| format!("Failed to open blob store at {}", data_path.display()))?;
        if let Err(e) = store.purge_stale_staging(max_age) {
            warn!(error = %e, "Failed to purge stale temp files");
        }
        Ok(store)
    })
    .await
    .context("Store initialisation task failed")??;

    let state = AppState {
        store: Arc::new(store),
        list_limit: config.server.list_limit,
    };

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("rstr ready");
    info!("   Config: {}", sources.summary());
    info!("   Store: {}", config.store.data_path.display());
    info!("   HTTP:  http://{}/blobs", addr);
    if config.store.read_only {
        info!("   Mode:  read-only");
    }

    serve(listener, state, shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Serve `state` on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
