// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

//! `furnace proxy`: lease registry and request router.

use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use furnace_core::application::{LeaseRegistry, RequestRouter};
use furnace_core::domain::config::{ProxyConfig, DEFAULT_AGENT_PORT, DEFAULT_LEASE_SECONDS};
use furnace_core::infrastructure::agent_client::HttpAgentConnector;
use furnace_core::presentation::proxy_api;

use crate::server;

#[derive(Debug, Clone, Args)]
pub struct ProxyArgs {
    /// HTTP API port
    #[arg(long, env = "FURNACE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Lease granted to each registration, in seconds
    #[arg(
        long,
        env = "FURNACE_LEASE",
        default_value_t = DEFAULT_LEASE_SECONDS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub lease: u64,

    /// Port assumed for agents that register without one
    #[arg(long, env = "FURNACE_AGENT_PORT", default_value_t = DEFAULT_AGENT_PORT)]
    pub agent_port: u16,

    /// Timeout for a single forwarded request, in seconds
    #[arg(long, env = "FURNACE_FORWARD_TIMEOUT", default_value_t = 60)]
    pub forward_timeout: u64,
}

impl ProxyArgs {
    pub fn into_config(self) -> ProxyConfig {
        ProxyConfig {
            lease: Duration::from_secs(self.lease),
            default_agent_port: self.agent_port,
            port: self.port,
            forward_timeout: Duration::from_secs(self.forward_timeout),
        }
    }
}

pub async fn run(args: ProxyArgs) -> Result<()> {
    let config = args.into_config();
    info!(
        port = config.port,
        lease_secs = config.lease.as_secs(),
        "Starting Furnace proxy"
    );

    let registry = Arc::new(LeaseRegistry::new(config.lease, config.default_agent_port));
    let sweeper = registry.clone().start_sweeper();
    let connector = Arc::new(HttpAgentConnector::new(config.forward_timeout));
    let router = RequestRouter::new(registry.clone(), connector);

    let served = server::serve(proxy_api::app(router), config.port).await;

    info!("Furnace proxy shutting down");
    registry.shutdown_token().cancel();
    let _ = sweeper.await;

    served
}
