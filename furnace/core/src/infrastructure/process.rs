// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Subprocess launcher backed by `tokio::process`.
//!
//! Children inherit stderr so tool diagnostics land in the agent's log stream;
//! stdout goes to the step's file when one is set.

use async_trait::async_trait;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::domain::process::{
    ExitOutcome, ProcessError, ProcessLauncher, ProcessStep, RunningProcess, SIGTERM,
};

#[derive(Debug, Clone, Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, step: &ProcessStep) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let spawn_failed = |reason: String| ProcessError::SpawnFailed {
            label: step.label.clone(),
            reason,
        };

        let mut command = Command::new(&step.program);
        command
            .args(&step.args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit());

        match &step.stdout {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .map_err(|e| spawn_failed(format!("cannot open {}: {}", path.display(), e)))?;
                command.stdout(Stdio::from(file));
            }
            None => {
                command.stdout(Stdio::inherit());
            }
        }
        if let Some(dir) = &step.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| spawn_failed(e.to_string()))?;
        debug!(
            label = %step.label,
            program = %step.program.display(),
            args = ?step.args,
            pid = ?child.id(),
            "Spawned process"
        );

        Ok(Box::new(TokioProcess {
            label: step.label.clone(),
            child,
        }))
    }
}

struct TokioProcess {
    label: String,
    child: Child,
}

#[async_trait]
impl RunningProcess for TokioProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn request_stop(&mut self) -> Result<(), ProcessError> {
        // Already reaped.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        send_signal(pid, SIGTERM).map_err(|reason| ProcessError::SignalFailed {
            label: self.label.clone(),
            reason,
        })
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ProcessError::WaitFailed {
                label: self.label.clone(),
                reason: e.to_string(),
            })?;

        match (status.code(), status.signal()) {
            (Some(code), _) => Ok(ExitOutcome::Code(code)),
            (None, Some(signal)) => Ok(ExitOutcome::Signal(signal)),
            (None, None) => Err(ProcessError::WaitFailed {
                label: self.label.clone(),
                reason: format!("unrecognised exit status {}", status),
            }),
        }
    }
}

/// Send `signal` to `pid`. A process that is already gone counts as success.
fn send_signal(pid: u32, signal: i32) -> Result<(), String> {
    let pid = libc::pid_t::try_from(pid).map_err(|e| e.to_string())?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(format!("failed to send signal {} to process {}: {}", signal, pid, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::process::TERMINATED_EXIT_CODE;

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let launcher = TokioProcessLauncher::new();
        let step = ProcessStep::new("false", "sh").args(["-c", "exit 3"]);

        let mut process = launcher.launch(&step).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), ExitOutcome::Code(3));
    }

    #[tokio::test]
    async fn test_stdout_redirected_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("out.txt");
        let step = ProcessStep::new("echo", "sh")
            .args(["-c", "echo hello"])
            .stdout_to(&target);

        let mut process = TokioProcessLauncher::new().launch(&step).await.unwrap();
        assert!(process.wait().await.unwrap().success());
        assert_eq!(std::fs::read_to_string(target).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn test_stop_terminates_long_running_process() {
        let step = ProcessStep::new("sleep", "sleep").arg("30");
        let mut process = TokioProcessLauncher::new().launch(&step).await.unwrap();

        process.request_stop().unwrap();
        let outcome = process.wait().await.unwrap();

        assert!(outcome.is_clean_or_stopped());
        assert!(matches!(
            outcome,
            ExitOutcome::Signal(SIGTERM) | ExitOutcome::Code(TERMINATED_EXIT_CODE)
        ));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let step = ProcessStep::new("missing", "/nonexistent/furnace-tool");
        let result = TokioProcessLauncher::new().launch(&step).await;
        assert!(matches!(result, Err(ProcessError::SpawnFailed { label, .. }) if label == "missing"));
    }
}
