//! Command-line interface definitions for the dashboard.
//!
//! This module contains the CLI argument parsing structures and enums
//! used by the `fleetpulse` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "fleetpulse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the telemetry hub and serve the websocket/API surface.
    Serve(ServiceArgs),

    /// Attach a live view to a simulated fleet and log what it sees.
    Tail(TailArgs),
}

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

/// Arguments for the serve command.
#[derive(Debug, Parser)]
pub struct ServiceArgs {
    /// Path to the configuration file. Built-in defaults apply when omitted.
    #[arg(short, long, env = "FLEETPULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Optional override for the listen port (overrides port in config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Optional override for the bind address (overrides bind in config)
    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long, value_enum, default_value_t)]
    pub log_format: LogFormat,
}

/// Arguments for the tail command.
#[derive(Debug, Parser)]
pub struct TailArgs {
    /// Path to the configuration file. Built-in defaults apply when omitted.
    #[arg(short, long, env = "FLEETPULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Stop after this many seconds; runs until ctrl-c when omitted.
    #[arg(long)]
    pub seconds: Option<u64>,

    #[arg(long, value_enum, default_value_t)]
    pub log_format: LogFormat,
}
