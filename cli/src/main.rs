// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Furnace
//!
//! The `furnace` binary runs either side of the profiling setup:
//!
//! - `furnace agent` - sidecar that records with `perf` and renders flame graphs
//! - `furnace proxy` - central registry that forwards calls to registered agents
//!
//! Both are configured from flags with environment fallbacks so they can be
//! driven entirely from a pod spec.

use anyhow::Result;
use clap::{Parser, Subcommand};

use furnace_cli::commands::{self, AgentArgs, ProxyArgs};
use furnace_cli::telemetry;

/// Furnace - on-demand flame graphs for running pods
#[derive(Parser)]
#[command(name = "furnace")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FURNACE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true, env = "FURNACE_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the profiling agent next to the profiled container
    #[command(name = "agent")]
    Agent(AgentArgs),

    /// Run the registration proxy
    #[command(name = "proxy")]
    Proxy(ProxyArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init_logging(&cli.log_level)?;
    if let Some(port) = cli.metrics_port {
        telemetry::init_metrics(port)?;
    }

    match cli.command {
        Commands::Agent(args) => commands::agent::run(args).await,
        Commands::Proxy(args) => commands::proxy::run(args).await,
    }
}
