//! Server lifecycle: build the store, serve the API, stop the sweeper.

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use shhh_core::EphemeralStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Serve until `shutdown` resolves, then drain connections and stop the sweeper.
pub async fn run(
    config: ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = config.listen_addr()?;

    log::info!("shhh server starting…");
    log::info!("  Listen:         {}", addr);
    log::info!("  Max items:      {}", config.limits.max_items);
    log::info!("  Max file size:  {} bytes", config.limits.max_file_size);
    log::info!(
        "  Max retention:  {} seconds ({:.1} hours)",
        config.limits.max_retention_secs,
        config.limits.max_retention_secs as f64 / 3600.0
    );
    log::info!("  Sweep interval: {} seconds", config.limits.sweep_interval_secs);

    let store = Arc::new(EphemeralStore::new(config.store_config()));
    let state = AppState {
        store: Arc::clone(&store),
        limits: Arc::new(config.limits.clone()),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!("listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("HTTP server error");

    store.shutdown().await;
    log::info!("server stopped");
    served
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("Received shutdown signal. Exiting…");
}
