//! Runtime configuration for the HTTP Gateway binary.
//!
//! Same `OrthoConfig`/`clap::Args` shape as the teacher's
//! `server::cli::AppConfig` (`src/server/cli.rs`), with an `AGENT_` env
//! prefix covering the terminal defaults and timeout ceilings every
//! transactional request falls back on.

#![allow(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]

use clap::{Args, Parser};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

/// Process-wide defaults for the Gateway, overridable per-request.
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone)]
#[ortho_config(prefix = "AGENT_")]
pub struct GatewayConfig {
    /// Default terminal IP address.
    #[ortho_config(default = "127.0.0.1".to_owned())]
    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    pub terminal_ip: String,
    /// Default primary terminal TCP port.
    #[ortho_config(default = 5600)]
    #[arg(long, default_value_t = 5600)]
    pub terminal_port: u16,
    /// Default secondary terminal TCP port, tried when the primary refuses.
    #[ortho_config(default = 5601)]
    #[arg(long, default_value_t = 5601)]
    pub terminal_port_alt: u16,
    /// Default ECR identity echoed in outbound envelopes.
    #[ortho_config(default = "ECR1".to_owned())]
    #[arg(long, default_value_t = String::from("ECR1"))]
    pub ecr_id: String,
    /// Connect timeout ceiling, in milliseconds.
    #[ortho_config(default = 5000)]
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,
    /// Overall session timeout ceiling, in milliseconds.
    #[ortho_config(default = 180_000)]
    #[arg(long, default_value_t = 180_000)]
    pub read_timeout_ms: u64,
    /// Idle-since-last-frame timeout ceiling, in milliseconds.
    #[ortho_config(default = 25_000)]
    #[arg(long, default_value_t = 25_000)]
    pub idle_byte_timeout_ms: u64,
    /// Port the Gateway's own HTTP listener binds to.
    #[ortho_config(default = 3000)]
    #[arg(long, default_value_t = 3000)]
    pub http_port: u16,
}

/// Top-level CLI entry point for the `gateway` binary.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
pub struct Cli {
    /// Gateway configuration.
    #[command(flatten)]
    pub config: GatewayConfig,
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn env_config_loading() {
        Jail::expect_with(|j| {
            j.set_env("AGENT_TERMINAL_IP", "10.0.0.5");
            j.set_env("AGENT_TERMINAL_PORT", "6600");
            let cfg = GatewayConfig::load_from_iter(["gateway"]).expect("load");
            assert_eq!(cfg.terminal_ip, "10.0.0.5");
            assert_eq!(cfg.terminal_port, 6600);
            Ok(())
        });
    }

    #[rstest]
    fn cli_overrides_env() {
        Jail::expect_with(|j| {
            j.set_env("AGENT_HTTP_PORT", "4000");
            let cfg = GatewayConfig::load_from_iter(["gateway", "--http-port", "5000"]).expect("load");
            assert_eq!(cfg.http_port, 5000);
            Ok(())
        });
    }

    #[rstest]
    fn defaults_match_spec() {
        Jail::expect_with(|_j| {
            let cfg = GatewayConfig::load_from_iter(["gateway"]).expect("load");
            assert_eq!(cfg.connect_timeout_ms, 5000);
            assert_eq!(cfg.read_timeout_ms, 180_000);
            assert_eq!(cfg.idle_byte_timeout_ms, 25_000);
            assert_eq!(cfg.http_port, 3000);
            Ok(())
        });
    }
}
