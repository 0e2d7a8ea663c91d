// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! In-memory [`ProcessLauncher`] that plays back canned behaviour per step
//! label instead of spawning real tools. Records every launched step.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::domain::process::{
    ExitOutcome, ProcessError, ProcessLauncher, ProcessStep, RunningProcess, TERMINATED_EXIT_CODE,
};

/// What a scripted process does once launched.
#[derive(Debug, Clone)]
pub struct ScriptedBehaviour {
    /// Returned from `launch` instead of a process.
    spawn_error: Option<String>,
    /// Exit outcome; for long-running processes, the outcome after a stop.
    outcome: ExitOutcome,
    /// Keep running until `request_stop` is called.
    until_stopped: bool,
    /// Written to the step's stdout file on launch.
    stdout: Option<String>,
    delay: Option<Duration>,
}

impl ScriptedBehaviour {
    pub fn exit(code: i32) -> Self {
        Self {
            spawn_error: None,
            outcome: ExitOutcome::Code(code),
            until_stopped: false,
            stdout: None,
            delay: None,
        }
    }

    /// Runs until stopped, then exits like a JVM child killed by `SIGTERM`.
    pub fn until_stopped() -> Self {
        Self {
            until_stopped: true,
            ..Self::exit(TERMINATED_EXIT_CODE)
        }
    }

    pub fn spawn_failure(reason: impl Into<String>) -> Self {
        Self {
            spawn_error: Some(reason.into()),
            ..Self::exit(0)
        }
    }

    pub fn with_outcome(mut self, outcome: ExitOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_stdout(mut self, content: impl Into<String>) -> Self {
        self.stdout = Some(content.into());
        self
    }

    /// Delay before exiting; for long-running processes, counted from the stop.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Default for ScriptedBehaviour {
    fn default() -> Self {
        Self::exit(0)
    }
}

#[derive(Default)]
struct LauncherState {
    behaviours: HashMap<String, ScriptedBehaviour>,
    launched: Vec<ProcessStep>,
    stops: Vec<String>,
}

/// Cheap to clone; clones share behaviours and history.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    state: Arc<Mutex<LauncherState>>,
    next_pid: Arc<AtomicU32>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    /// Behaviour for every step with this label. Unlisted labels exit 0.
    pub fn set(&self, label: impl Into<String>, behaviour: ScriptedBehaviour) {
        self.state.lock().behaviours.insert(label.into(), behaviour);
    }

    /// Every step launched so far, in launch order.
    pub fn launched(&self) -> Vec<ProcessStep> {
        self.state.lock().launched.clone()
    }

    pub fn launched_labels(&self) -> Vec<String> {
        self.state
            .lock()
            .launched
            .iter()
            .map(|s| s.label.clone())
            .collect()
    }

    /// Labels of processes that received a stop request.
    pub fn stop_requests(&self) -> Vec<String> {
        self.state.lock().stops.clone()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, step: &ProcessStep) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let behaviour = {
            let mut state = self.state.lock();
            let behaviour = state.behaviours.get(&step.label).cloned().unwrap_or_default();
            if behaviour.spawn_error.is_none() {
                state.launched.push(step.clone());
            }
            behaviour
        };

        if let Some(reason) = behaviour.spawn_error {
            return Err(ProcessError::SpawnFailed {
                label: step.label.clone(),
                reason,
            });
        }

        if let Some(path) = &step.stdout {
            let content = behaviour.stdout.clone().unwrap_or_default();
            tokio::fs::write(path, content)
                .await
                .map_err(|e| ProcessError::SpawnFailed {
                    label: step.label.clone(),
                    reason: e.to_string(),
                })?;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Box::new(ScriptedProcess {
            label: step.label.clone(),
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            behaviour,
            stop_tx,
            stop_rx,
            launcher: self.state.clone(),
        }))
    }
}

struct ScriptedProcess {
    label: String,
    pid: u32,
    behaviour: ScriptedBehaviour,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    launcher: Arc<Mutex<LauncherState>>,
}

#[async_trait]
impl RunningProcess for ScriptedProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn request_stop(&mut self) -> Result<(), ProcessError> {
        self.launcher.lock().stops.push(self.label.clone());
        self.stop_tx.send_replace(true);
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        if self.behaviour.until_stopped {
            loop {
                let stopped = *self.stop_rx.borrow_and_update();
                if stopped {
                    break;
                }
                self.stop_rx
                    .changed()
                    .await
                    .map_err(|e| ProcessError::WaitFailed {
                        label: self.label.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }
        if let Some(delay) = self.behaviour.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.behaviour.outcome)
    }
}
