use std::net::SocketAddr;

use anyhow::{Context, Result};
use rinkside_service::config::Config;
use rinkside_service::metric;
use rinkside_service::services::create_service;
use tokio::net::TcpListener;

use crate::endpoints;
use crate::scheduler;

/// Starts the HTTP server and the refresh scheduler based on loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("rinkside-web")
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))?;
    tracing::info!("System shutdown complete");

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let service = create_service(&config).context("failed to create service")?;
    let app = endpoints::create_app(service.clone(), &config);

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind))?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let _scheduler = scheduler::spawn(service);

    // Client addresses are needed for per-client rate limits.
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(err) => {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "Failed to listen for shutdown signal",
            );
            futures::future::pending::<()>().await;
        }
    }
}
