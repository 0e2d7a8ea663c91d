// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Agent Controller - per-agent control surface over the [`ProcessPipeline`]
//!
//! Adds what the pipeline alone does not know about: the configured default
//! process pattern, timed stops, autostart/autostop/autorestart, readiness
//! (reference image mounted) and the registration request advertised to the
//! proxy.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Start/stop/status/chart use cases and their timers

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::pipeline::{PipelineCompletion, ProcessPipeline};
use crate::domain::config::{AgentConfig, AutoStopMode};
use crate::domain::pipeline::{
    AgentStatus, PipelineError, PostProcessOptions, RecordHandle, TargetSelector,
};
use crate::domain::process::ProcessLauncher;
use crate::domain::registration::RegistrationRequest;
use crate::infrastructure::image_mount::ImageMounter;

pub struct AgentController {
    config: AgentConfig,
    launcher: Arc<dyn ProcessLauncher>,
    pipeline: ProcessPipeline,
    ready: AtomicBool,
    /// Timer of the current recording's scheduled stop, if any.
    deferred_stop: parking_lot::Mutex<Option<CancellationToken>>,
    shutdown_token: CancellationToken,
}

impl AgentController {
    pub fn new(config: AgentConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let pipeline = ProcessPipeline::new(
            launcher.clone(),
            config.paths.clone(),
            config.identity.clone(),
        );
        Self {
            config,
            launcher,
            pipeline,
            ready: AtomicBool::new(false),
            deferred_stop: parking_lot::Mutex::new(None),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &ProcessPipeline {
        &self.pipeline
    }

    /// Get a handle to cancel timers and the autostart loop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Cancel pending timers. An in-flight post-processing chain is not awaited.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Start recording. Without an explicit pattern the configured default
    /// applies; with `stop_after` a stop using `options` is scheduled.
    pub async fn start(
        &self,
        stop_after: Option<Duration>,
        process_pattern: Option<String>,
        options: PostProcessOptions,
    ) -> Result<RecordHandle, PipelineError> {
        let pattern = process_pattern
            .filter(|p| !p.is_empty())
            .or_else(|| self.config.process_pattern.clone());

        let handle = self.pipeline.record(TargetSelector::from_pattern(pattern)).await?;

        self.cancel_deferred_stop();
        if let Some(after) = stop_after {
            info!(after_secs = after.as_secs(), "The recording will stop automatically");
            self.schedule_stop(after, options);
        }
        Ok(handle)
    }

    pub async fn stop(&self, options: PostProcessOptions) -> Result<PipelineCompletion, PipelineError> {
        let completion = self.pipeline.stop(options).await?;
        self.cancel_deferred_stop();
        Ok(completion)
    }

    /// Legacy single-string status.
    pub async fn status(&self) -> String {
        self.pipeline.status().await.token().to_string()
    }

    pub async fn detail(&self) -> AgentStatus {
        let (state, window) = self.pipeline.snapshot().await;
        AgentStatus::new(&state, window)
    }

    /// Bytes of the last rendered chart.
    pub async fn chart(&self) -> Result<Vec<u8>, PipelineError> {
        match tokio::fs::read(self.pipeline.paths().artifact()).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::ArtifactNotAvailable)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Mount the reference image (when pulling is enabled) and become ready.
    /// A failed mount is logged and leaves the agent not ready.
    pub async fn prepare(&self) {
        let image = &self.config.image;
        if !image.pull_enabled {
            info!(image = ?image.main_image, "Pulling image disabled");
            self.ready.store(true, Ordering::SeqCst);
            return;
        }

        let mounter = ImageMounter::new(
            self.launcher.clone(),
            image.clone(),
            self.config.paths.mountpoint(),
        );
        match mounter.mount().await {
            Ok(root) => {
                self.pipeline.set_symbol_root(Some(root));
                self.ready.store(true, Ordering::SeqCst);
            }
            Err(e) => error!(error = %e, image = ?image.main_image, "Failed to mount container image"),
        }
    }

    pub fn symbol_root(&self) -> Option<PathBuf> {
        self.pipeline.symbol_root()
    }

    pub fn registration_request(&self) -> RegistrationRequest {
        let identity = &self.config.identity;
        RegistrationRequest {
            pod_name: Some(identity.name.clone()),
            namespace: Some(identity.namespace.clone()),
            ip: identity.ip.clone(),
            port: i32::from(self.config.port),
        }
    }

    /// Evaluate the autostart policy against this pod and, on a match, spawn
    /// the start (and restart loop, if configured).
    pub fn start_autostart(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let policy = self.config.autostart.as_ref()?;
        if !policy.matches(&self.config.identity.name) {
            debug!(pod = %self.config.identity.name, "Pod does not match autostart patterns");
            return None;
        }

        info!(pod = %self.config.identity.name, "Auto-starting recording");
        let controller = self.clone();
        Some(tokio::spawn(async move {
            controller.run_autostart().await;
        }))
    }

    async fn run_autostart(&self) {
        let Some(policy) = self.config.autostart.clone() else {
            return;
        };

        if let Some(delay) = policy.delay {
            if !self.sleep_or_shutdown(delay).await {
                return;
            }
        }

        let options = autostart_options();
        match policy.mode {
            AutoStopMode::Manual => self.start_logged(None, options).await,
            AutoStopMode::StopAfter(after) => self.start_logged(Some(after), options).await,
            AutoStopMode::RestartEvery(period) => {
                self.start_logged(None, options.clone()).await;
                self.restart_loop(period, options).await;
            }
        }
    }

    async fn restart_loop(&self, period: Duration, options: PostProcessOptions) {
        info!(period_secs = period.as_secs(), "Recording will restart periodically");
        while self.sleep_or_shutdown(period).await {
            match self.stop(options.clone()).await {
                Ok(completion) => {
                    if let Err(e) = completion.wait().await {
                        warn!(error = %e, "Post-processing failed before restart");
                    }
                }
                Err(e) => warn!(error = %e, "Periodic stop skipped"),
            }
            self.start_logged(None, options.clone()).await;
        }
        debug!("Restart loop stopped");
    }

    async fn start_logged(&self, stop_after: Option<Duration>, options: PostProcessOptions) {
        if let Err(e) = self.start(stop_after, None, options).await {
            error!(error = %e, "Automatic start failed");
        }
    }

    /// Returns false if shutdown came first.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown_token.cancelled() => false,
        }
    }

    fn schedule_stop(&self, after: Duration, options: PostProcessOptions) {
        let token = self.shutdown_token.child_token();
        if let Some(previous) = self.deferred_stop.lock().replace(token.clone()) {
            previous.cancel();
        }

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {}
                _ = token.cancelled() => {
                    debug!("Scheduled stop cancelled");
                    return;
                }
            }
            match pipeline.stop(options).await {
                Ok(_) => info!("Recording stopped on schedule"),
                Err(e) if e.is_rejection() => debug!(error = %e, "Scheduled stop found nothing to stop"),
                Err(e) => error!(error = %e, "Scheduled stop failed"),
            }
        });
    }

    fn cancel_deferred_stop(&self) {
        if let Some(token) = self.deferred_stop.lock().take() {
            token.cancel();
        }
    }
}

/// Options used by automatic starts: symbols from the mounted image, icicle layout.
pub fn autostart_options() -> PostProcessOptions {
    PostProcessOptions {
        symbols_from_image: true,
        inverted: true,
        ..PostProcessOptions::default()
    }
}
