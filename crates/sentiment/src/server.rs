use std::net::SocketAddr;

use anyhow::{Context, Result};
use sentiment_service::config::Config;
use sentiment_service::metric;
use sentiment_service::services::create_service;

use crate::endpoints;

/// Creates the service and runs the HTTP server until it shuts down.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sentiment-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let socket = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address `{}`", config.bind))?;

    runtime.block_on(async {
        let service = create_service(&config).context("failed to create sentiment service")?;
        tracing::info!(
            cache_ttl = ?service.cache_ttl(),
            "Starting HTTP server on {}",
            socket
        );

        axum_server::bind(socket)
            .serve(endpoints::create_app(service).into_make_service())
            .await
            .context("HTTP server failed")
    })?;
    tracing::info!("System shutdown complete");

    Ok(())
}
