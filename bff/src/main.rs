//! Moderation relay HTTP service.
//!
//! Accepts chat messages, screens them against a keyword list and streams
//! completions for approved messages as server-sent events.
//!
//! ```bash
//! OPENAI_API_KEY=sk-... cargo run -p bff
//! ```
//!
//! Set `RUST_LOG` to adjust log output (default `info`).

mod routes;

use anyhow::Context;
use bff_core::{Backend, BffConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BffConfig::from_env().context("failed to read configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let backend = Backend::from_config(&config).context("failed to initialize backend")?;

    if config.validate_api_key {
        backend
            .verify_upstream()
            .await
            .context("failed to validate OpenAI API key")?;
    } else {
        tracing::warn!("skipping API key validation");
    }

    let app = routes::router(Arc::new(backend));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
