//! Binary entry point for the HTTP Gateway.
//!
//! The runtime logic lives in `payagent::gateway`, so this binary only
//! initializes logging and delegates to the shared library code.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    payagent::gateway::run().await
}
