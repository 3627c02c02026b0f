//! Runtime configuration for the emulator binary.
//!
//! Mirrors the teacher's `server::cli::AppConfig` (`src/server/cli.rs`):
//! a single `OrthoConfig`/`clap::Args` struct layered CLI > env > dotfile >
//! default, with an `EMULATOR_` env prefix in place of the teacher's `MXD_`.

#![allow(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]

use clap::{Args, Parser};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the Terminal Emulator.
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone)]
#[ortho_config(prefix = "EMULATOR_")]
pub struct EmulatorConfig {
    /// Address the emulator's TCP listener binds to.
    #[ortho_config(default = "0.0.0.0:5600".to_owned())]
    #[arg(long, default_value_t = String::from("0.0.0.0:5600"))]
    pub bind: String,
    /// Path to the JSON snapshot file used for transaction/batch persistence.
    #[ortho_config(default = "verifone-transactions.json".to_owned())]
    #[arg(long, default_value_t = String::from("verifone-transactions.json"))]
    pub data_file: String,
    /// Seconds between periodic re-flushes of the latest snapshot.
    #[ortho_config(default = 30)]
    #[arg(long, default_value_t = 30)]
    pub flush_interval_secs: u64,
}

/// Top-level CLI entry point for the `emulator` binary.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
pub struct Cli {
    /// Emulator configuration.
    #[command(flatten)]
    pub config: EmulatorConfig,
}
