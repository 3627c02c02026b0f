//! HTTP Gateway: translates REST requests into framed terminal commands via
//! the Protocol Engine.
//!
//! Laid out the way the teacher lays out `server` (`src/server/mod.rs`): a
//! `config` module for the CLI/env surface, `state`/`errors`/`envelope`/
//! `routes` for the gateway's own concerns, and a thin [`run`] entry point.
//! There is no HTTP framework in the teacher; the router wiring below is
//! grounded on the `axum`/`tower-http` shape used by the x402 facilitator
//! example in the broader pack (`other_examples/`).

pub mod config;
pub mod envelope;
pub mod errors;
pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

pub use config::{Cli, GatewayConfig};
pub use state::GatewayState;

/// Build the Gateway's router over a shared [`GatewayState`].
#[must_use]
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/availability", get(routes::availability))
        .route("/ping", get(routes::ping))
        .route("/sale", post(routes::sale))
        .route("/sale/lodging", post(routes::sale_lodging))
        .route("/preauth", post(routes::preauth))
        .route("/auth-completion", post(routes::auth_completion))
        .route("/void", post(routes::void))
        .route("/refund", post(routes::refund))
        .route("/tip-adjust", post(routes::tip_adjust))
        .route("/batch-close", post(routes::batch_close))
        .route("/command", post(routes::command))
        .route("/config", post(routes::config))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parse CLI/env configuration and run the Gateway until a shutdown signal
/// arrives.
///
/// # Errors
///
/// Returns any failure reported while binding the HTTP listener.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    run_with_config(cli.config).await
}

/// Execute the Gateway using an already-resolved [`GatewayConfig`].
///
/// # Errors
///
/// Propagates failures from socket binding.
pub async fn run_with_config(cfg: GatewayConfig) -> Result<()> {
    let http_port = cfg.http_port;
    let state = Arc::new(GatewayState::new(&cfg));
    let app = router(state);

    let bind = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "gateway listening");

    axum::serve(listener, app).with_graceful_shutdown(wait_for_shutdown()).await?;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            tracing::warn!(%err, "failed to listen for Ctrl-C");
                        }
                    },
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for Ctrl-C");
    }
}
