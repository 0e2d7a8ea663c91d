// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Profiling Pipeline Domain Types
//!
//! One profiling run goes through four external tools in a fixed order:
//!
//! ```text
//! Idle ──record──▶ Recording ──stop──▶ Scripting ──▶ Collapsing ──▶ Rendering ──▶ Idle
//!                      │                   │              │              │
//!                      └───────────────────┴──────────────┴──────────────┴──▶ Error(message)
//! ```
//!
//! `Error` keeps its message until the next successful record. The legacy
//! status token of a state is what `GET /status` returns; in `Error` the token
//! is the message itself.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::process::{ExitOutcome, ProcessError};

/// Format used for the recording window in chart titles.
pub const TITLE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Recording,
    Scripting,
    Collapsing,
    Rendering,
    Error(String),
}

impl PipelineState {
    /// A subprocess is owned by the pipeline in this state.
    pub fn is_busy(&self) -> bool {
        !matches!(self, PipelineState::Idle | PipelineState::Error(_))
    }

    /// Legacy wire token, shared with the web UI's progress bar.
    pub fn token(&self) -> &str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Recording => "perf record",
            PipelineState::Scripting => "perf script",
            PipelineState::Collapsing => "stackcollapse",
            PipelineState::Rendering => "flamegraph",
            PipelineState::Error(message) => message,
        }
    }

    /// Stable machine-readable name, independent of the error text.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Recording => "recording",
            PipelineState::Scripting => "scripting",
            PipelineState::Collapsing => "collapsing",
            PipelineState::Rendering => "rendering",
            PipelineState::Error(_) => "error",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Wall-clock bounds of the last recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingWindow {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RecordingWindow {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ended_at: None,
        }
    }

    /// `{namespace}/{pod} {start} - {end}` in local time.
    pub fn title(&self, namespace: &str, pod: &str) -> String {
        let format = |at: Option<DateTime<Utc>>| {
            at.map(|t| t.with_timezone(&Local).format(TITLE_TIME_FORMAT).to_string())
                .unwrap_or_default()
        };
        format!(
            "{}/{} {} - {}",
            namespace,
            pod,
            format(self.started_at),
            format(self.ended_at)
        )
    }
}

/// Which processes the recorder samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    WholeSystem,
    /// Processes whose name matches this `pgrep` pattern.
    ProcessPattern(String),
}

impl TargetSelector {
    pub fn from_pattern(pattern: Option<String>) -> Self {
        match pattern {
            Some(p) if !p.is_empty() => TargetSelector::ProcessPattern(p),
            _ => TargetSelector::WholeSystem,
        }
    }
}

/// Options shaping symbol resolution and the rendered chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessOptions {
    /// Resolve symbols against the mounted reference image (`perf script --symfs`).
    pub symbols_from_image: bool,
    /// Chart width in pixels; `<= 0` keeps the tool default.
    pub width: i32,
    /// FlameGraph palette name; empty keeps the tool default.
    pub colors: String,
    /// Icicle layout (root at the top).
    pub inverted: bool,
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self {
            symbols_from_image: false,
            width: 0,
            colors: String::new(),
            inverted: true,
        }
    }
}

/// Returned by a successful record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub target: TargetSelector,
}

/// Structured view of an agent's status.
///
/// `message` carries the legacy single-channel token; `last_error` is only set
/// while the pipeline sits in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub state: String,
    pub message: String,
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub window: RecordingWindow,
}

impl AgentStatus {
    pub fn new(state: &PipelineState, window: RecordingWindow) -> Self {
        Self {
            state: state.kind().to_string(),
            message: state.token().to_string(),
            last_error: match state {
                PipelineState::Error(message) => Some(message.clone()),
                _ => None,
            },
            window,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Already running: {0}")]
    AlreadyRunning(String),

    #[error("Not running: current status is: {0}")]
    NotRunning(String),

    #[error("Already stopping...")]
    AlreadyStopping,

    #[error("No processes match pattern {0}")]
    NoTargetFound(String),

    #[error("Failed to start `{step}`: {reason}")]
    SubprocessSpawnFailed { step: String, reason: String },

    #[error("Non-zero return code from `{step}`: {outcome}")]
    SubprocessNonZeroExit { step: String, outcome: ExitOutcome },

    #[error("Interrupted waiting for `{step}`: {reason}")]
    SubprocessInterrupted { step: String, reason: String },

    #[error("No chart has been rendered yet")]
    ArtifactNotAvailable,

    #[error("Post-processing worker is not running")]
    WorkerUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for PipelineError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::SpawnFailed { label, reason } => {
                PipelineError::SubprocessSpawnFailed { step: label, reason }
            }
            ProcessError::WaitFailed { label, reason }
            | ProcessError::SignalFailed { label, reason } => {
                PipelineError::SubprocessInterrupted { step: label, reason }
            }
        }
    }
}

impl PipelineError {
    /// Errors caused by the caller asking at the wrong time or for nothing.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::AlreadyRunning(_)
                | PipelineError::NotRunning(_)
                | PipelineError::AlreadyStopping
                | PipelineError::NoTargetFound(_)
        )
    }
}
