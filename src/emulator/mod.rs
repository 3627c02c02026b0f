//! Terminal Emulator: a standalone TCP server that speaks the framed
//! terminal protocol and simulates a payment terminal's transaction and
//! batch lifecycle.
//!
//! Laid out the way the teacher lays out `server` (`src/server/mod.rs`):
//! a `config` module exposing the CLI/env surface, plus the modules that do
//! the actual work, with a thin [`run`] entry point binaries can call.

pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod payload;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use camino::Utf8Path;
use clap::Parser;
use tokio::{net::TcpListener, sync::watch};
use tracing::info;

pub use config::{Cli, EmulatorConfig};
pub use dispatch::{DelayPolicy, NoDelay, RandomDelay};
pub use state::StateCore;

/// Parse CLI/env configuration and run the emulator until a shutdown signal
/// arrives.
///
/// # Errors
///
/// Returns any failure reported while loading state, binding the socket, or
/// running the accept loop.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    run_with_config(cli.config).await
}

/// Execute the emulator using an already-resolved [`EmulatorConfig`].
///
/// # Errors
///
/// Propagates failures from state loading or socket binding.
pub async fn run_with_config(cfg: EmulatorConfig) -> Result<()> {
    let flush_interval = std::time::Duration::from_secs(cfg.flush_interval_secs);
    let state = Arc::new(StateCore::load_or_init(Utf8Path::new(&cfg.data_file), flush_interval)?);
    let listener = TcpListener::bind(&cfg.bind).await?;
    info!(bind = %cfg.bind, "emulator listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_signal = wait_for_shutdown();
    tokio::pin!(shutdown_signal);

    tokio::select! {
        () = &mut shutdown_signal => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        () = dispatch::run(listener, state, Arc::new(RandomDelay), shutdown_rx) => {}
    }
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
