// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! # External Process Abstraction
//!
//! Every external tool the agent drives (`perf`, `pgrep`, the FlameGraph
//! perl scripts, `podman`, auxiliary `bash` scripts) is described as a typed
//! [`ProcessStep`] and executed through a [`ProcessLauncher`]. Nothing is
//! ever assembled into a shell string.
//!
//! | Type | Role |
//! |------|------|
//! | [`ProcessStep`] | program, arguments, working directory, stdout destination |
//! | [`ExitOutcome`] | how a process ended (exit code or terminating signal) |
//! | [`ProcessLauncher`] | spawns a step, returning a [`RunningProcess`] |
//! | [`RunningProcess`] | handle used to signal and await one child |
//!
//! The production launcher lives in [`crate::infrastructure::process`]; the
//! in-memory [`crate::infrastructure::scripted::ScriptedLauncher`] stands in
//! for real tools in tests.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// `SIGTERM`, the signal used to ask the recorder to finish.
pub const SIGTERM: i32 = 15;

/// Exit code reported by shells and JVM-style launchers for a child killed by `SIGTERM`.
pub const TERMINATED_EXIT_CODE: i32 = 128 + SIGTERM;

/// One invocation of an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStep {
    /// Short human-readable name used in logs and error messages (e.g. `perf record`).
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// When set, stdout is redirected into this file (truncated on spawn).
    pub stdout: Option<PathBuf>,
}

impl ProcessStep {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stdout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }

    /// Clean exit, or the exit we provoke ourselves when stopping the recorder.
    pub fn is_clean_or_stopped(&self) -> bool {
        match self {
            ExitOutcome::Code(0) | ExitOutcome::Code(TERMINATED_EXIT_CODE) => true,
            ExitOutcome::Signal(signal) => *signal == SIGTERM,
            ExitOutcome::Code(_) => false,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "{}", code),
            ExitOutcome::Signal(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{label}`: {reason}")]
    SpawnFailed { label: String, reason: String },

    #[error("interrupted waiting for `{label}`: {reason}")]
    WaitFailed { label: String, reason: String },

    #[error("failed to signal `{label}`: {reason}")]
    SignalFailed { label: String, reason: String },
}

/// Spawns [`ProcessStep`]s.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, step: &ProcessStep) -> Result<Box<dyn RunningProcess>, ProcessError>;
}

/// A spawned child owned by exactly one caller at a time.
#[async_trait]
pub trait RunningProcess: Send + Sync {
    fn label(&self) -> &str;

    fn pid(&self) -> Option<u32>;

    /// Ask the process to terminate gracefully (`SIGTERM`). Does not wait.
    fn request_stop(&mut self) -> Result<(), ProcessError>;

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_exits_are_accepted() {
        assert!(ExitOutcome::Code(0).is_clean_or_stopped());
        assert!(ExitOutcome::Code(143).is_clean_or_stopped());
        assert!(ExitOutcome::Signal(SIGTERM).is_clean_or_stopped());

        assert!(!ExitOutcome::Code(1).is_clean_or_stopped());
        assert!(!ExitOutcome::Signal(9).is_clean_or_stopped());
    }

    #[test]
    fn test_step_builder() {
        let step = ProcessStep::new("perf script", "perf")
            .args(["script", "-i"])
            .arg("/out/perf.data")
            .stdout_to("/out/perf.script");

        assert_eq!(step.args, vec!["script", "-i", "/out/perf.data"]);
        assert_eq!(step.stdout, Some(PathBuf::from("/out/perf.script")));
        assert_eq!(step.working_dir, None);
    }
}
