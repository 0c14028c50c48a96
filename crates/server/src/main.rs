//! revcache server entry point.
//!
//! Boots the HTTP proxy endpoint. Logging goes to stderr as JSON lines.

use std::sync::Arc;

use anyhow::Result;
use revcache_client::{FetchConfig, HttpFetcher};
use revcache_core::{AppConfig, CacheController};
use tracing_subscriber::EnvFilter;

mod error;
mod replay;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let fetcher = HttpFetcher::new(FetchConfig::from(&config))?;
    let controller = CacheController::new(config.cache_config(), Arc::new(fetcher));
    let app = routes::router(routes::AppState::new(controller, &config));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        cache_root = %config.cache_root.display(),
        ttl_secs = config.ttl_secs,
        "Starting revcache server"
    );

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down revcache server");
}
