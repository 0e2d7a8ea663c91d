// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

//! `furnace agent`: the profiling sidecar.

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use furnace_core::application::{AgentController, LeaseRenewer};
use furnace_core::domain::config::{
    AgentConfig, AutoStartPolicy, ImageSetup, PipelinePaths, PodIdentity, DEFAULT_AGENT_PORT,
    DEFAULT_REGISTRATION_RETRY_SECONDS,
};
use furnace_core::infrastructure::process::TokioProcessLauncher;
use furnace_core::infrastructure::registry_client::HttpLeaseRegistrar;
use furnace_core::presentation::agent_api;

use super::non_empty;
use crate::server;

#[derive(Debug, Clone, Args)]
pub struct AgentArgs {
    /// Name of the profiled pod
    #[arg(long, env = "POD_NAME")]
    pub pod_name: String,

    /// Namespace of the profiled pod
    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: String,

    /// Address the proxy should reach this agent on
    #[arg(long, env = "POD_IP")]
    pub pod_ip: Option<String>,

    /// HTTP API port
    #[arg(long, env = "FURNACE_PORT", default_value_t = DEFAULT_AGENT_PORT)]
    pub port: u16,

    /// Base URL of the proxy to register with
    #[arg(long, env = "FURNACE_PROXY_URL")]
    pub proxy_url: Option<String>,

    /// Seconds between failed registration attempts
    #[arg(long, env = "FURNACE_REGISTRATION_RETRY", default_value_t = DEFAULT_REGISTRATION_RETRY_SECONDS)]
    pub registration_retry: u64,

    /// Comma-separated pod name patterns that start recording on boot
    #[arg(long, env = "AUTOSTART")]
    pub autostart: Option<String>,

    /// Seconds to wait before the automatic start
    #[arg(long, env = "AUTOSTART_DELAY")]
    pub autostart_delay: Option<u64>,

    /// Stop an automatic recording after this many seconds
    #[arg(long, env = "AUTOSTOP")]
    pub autostop: Option<u64>,

    /// Restart an automatic recording every this many seconds
    #[arg(long, env = "AUTORESTART")]
    pub autorestart: Option<u64>,

    /// Default process name filter for recordings
    #[arg(long, env = "PROCESS_PATTERN")]
    pub process_pattern: Option<String>,

    /// Mount the main container's image for symbol resolution
    #[arg(long, env = "PULL_IMAGE", default_value_t = true, action = ArgAction::Set)]
    pub pull_image: bool,

    /// Image of the profiled container
    #[arg(long, env = "FURNACE_MAIN_IMAGE")]
    pub main_image: Option<String>,

    #[arg(long, env = "FURNACE_OUTPUT_DIR", default_value = "/out")]
    pub output_dir: PathBuf,

    #[arg(long, env = "FURNACE_SCRIPTS_DIR", default_value = "/scripts")]
    pub scripts_dir: PathBuf,

    #[arg(long, env = "FURNACE_FLAMEGRAPH_DIR", default_value = "/root/FlameGraph")]
    pub flamegraph_dir: PathBuf,
}

impl AgentArgs {
    pub fn into_config(self) -> AgentConfig {
        let mut config = AgentConfig::new(PodIdentity {
            name: self.pod_name,
            namespace: self.pod_namespace,
            ip: non_empty(self.pod_ip),
        });
        config.port = self.port;
        config.paths = PipelinePaths {
            output_dir: self.output_dir,
            scripts_dir: self.scripts_dir,
            flamegraph_dir: self.flamegraph_dir,
            ..PipelinePaths::default()
        };
        config.process_pattern = non_empty(self.process_pattern);
        config.autostart = non_empty(self.autostart).map(|patterns| {
            AutoStartPolicy::new(
                &patterns,
                self.autostart_delay,
                self.autostop,
                self.autorestart,
            )
        });
        config.image = ImageSetup {
            pull_enabled: self.pull_image,
            main_image: non_empty(self.main_image),
            ..ImageSetup::default()
        };
        config.registry_url = non_empty(self.proxy_url);
        config.registration_retry = Duration::from_secs(self.registration_retry);
        config
    }
}

pub async fn run(args: AgentArgs) -> Result<()> {
    let config = args.into_config();
    let port = config.port;
    info!(
        pod = %config.identity.name,
        namespace = %config.identity.namespace,
        port,
        "Starting Furnace agent"
    );

    let controller = Arc::new(AgentController::new(
        config.clone(),
        Arc::new(TokioProcessLauncher::new()),
    ));

    {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller.prepare().await;
            controller.start_autostart();
        });
    }

    let renewer = match &config.registry_url {
        Some(url) if config.identity.ip.is_some() => {
            let registrar = HttpLeaseRegistrar::new(url.as_str())
                .context("Failed to create registration client")?;
            let renewer = Arc::new(LeaseRenewer::new(
                Arc::new(registrar),
                controller.registration_request(),
                config.registration_retry,
            ));
            renewer.clone().start();
            Some(renewer)
        }
        Some(url) => {
            warn!(proxy = %url, "POD_IP is not set, not registering with the proxy");
            None
        }
        None => None,
    };

    let served = server::serve(agent_api::app(controller.clone()), port).await;

    info!("Furnace agent shutting down");
    if let Some(renewer) = renewer {
        renewer.shutdown_token().cancel();
    }
    controller.shutdown();

    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use furnace_core::domain::config::AutoStopMode;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: AgentArgs,
    }

    fn parse(extra: &[&str]) -> AgentConfig {
        let mut argv = vec!["furnace", "--pod-name", "web-0", "--pod-namespace", "shop"];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).unwrap().args.into_config()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.identity.name, "web-0");
        assert_eq!(config.port, 12380);
        assert_eq!(config.paths.output_dir, PathBuf::from("/out"));
        assert_eq!(config.paths.scripts_dir, PathBuf::from("/scripts"));
        assert!(config.image.pull_enabled);
        assert!(config.autostart.is_none());
        assert!(config.registry_url.is_none());
        assert_eq!(config.registration_retry, Duration::from_secs(30));
    }

    #[test]
    fn test_autostart_settings() {
        let config = parse(&[
            "--autostart",
            "web-*",
            "--autostart-delay",
            "5",
            "--autorestart",
            "600",
        ]);
        let policy = config.autostart.unwrap();
        assert_eq!(policy.patterns, vec!["web-*"]);
        assert_eq!(policy.delay, Some(Duration::from_secs(5)));
        assert_eq!(policy.mode, AutoStopMode::RestartEvery(Duration::from_secs(600)));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let config = parse(&["--process-pattern", "", "--autostart", " ", "--pod-ip", ""]);
        assert!(config.process_pattern.is_none());
        assert!(config.autostart.is_none());
        assert!(config.identity.ip.is_none());
    }

    #[test]
    fn test_pull_image_can_be_disabled() {
        let config = parse(&["--pull-image", "false", "--main-image", "shop/web:1.4"]);
        assert!(!config.image.pull_enabled);
        assert_eq!(config.image.main_image.as_deref(), Some("shop/web:1.4"));
    }
}
