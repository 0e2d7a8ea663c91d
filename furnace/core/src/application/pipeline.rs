// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Process Pipeline
//!
//! Owns one profiling run on one agent: `perf record` until stopped, then
//! `perf script`, auxiliary scripts, `stackcollapse-perf.pl` and
//! `flamegraph.pl`, in that order.
//!
//! Mutations go through one `tokio::sync::Mutex` guarding the state, the
//! recorder slot and the recording window. The lock is never held while
//! waiting for a subprocess. Post-processing chains are consumed by a single
//! worker task, so two chains never overlap.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::config::{PipelinePaths, PodIdentity};
use crate::domain::pipeline::{
    PipelineError, PipelineState, PostProcessOptions, RecordHandle, RecordingWindow,
    TargetSelector,
};
use crate::domain::process::{ExitOutcome, ProcessLauncher, ProcessStep, RunningProcess};

pub const RECORD_STEP: &str = "perf record";
pub const SCRIPT_STEP: &str = "perf script";
pub const COLLAPSE_STEP: &str = "stackcollapse-perf.pl";
pub const RENDER_STEP: &str = "flamegraph.pl";
pub const PGREP_STEP: &str = "pgrep";

/// Sampling frequency handed to `perf record -F`.
const SAMPLING_FREQUENCY: &str = "99";

struct PipelineSlots {
    state: PipelineState,
    /// Present from a successful record until a stop hands it to the worker.
    recorder: Option<Box<dyn RunningProcess>>,
    window: RecordingWindow,
}

struct PipelineCore {
    launcher: Arc<dyn ProcessLauncher>,
    paths: PipelinePaths,
    identity: PodIdentity,
    /// Mount point of the reference image, used for `--symfs`.
    symbol_root: parking_lot::RwLock<Option<PathBuf>>,
    slots: Mutex<PipelineSlots>,
}

struct PostProcessJob {
    recorder: Box<dyn RunningProcess>,
    options: PostProcessOptions,
    done: oneshot::Sender<Result<(), PipelineError>>,
}

/// Resolves once the post-processing chain started by a stop has finished.
#[derive(Debug)]
pub struct PipelineCompletion {
    rx: oneshot::Receiver<Result<(), PipelineError>>,
}

impl PipelineCompletion {
    pub async fn wait(self) -> Result<(), PipelineError> {
        self.rx.await.unwrap_or(Err(PipelineError::WorkerUnavailable))
    }
}

/// Handle to the pipeline; cheap to clone.
#[derive(Clone)]
pub struct ProcessPipeline {
    core: Arc<PipelineCore>,
    jobs: mpsc::UnboundedSender<PostProcessJob>,
}

impl ProcessPipeline {
    /// Create the pipeline and spawn its post-processing worker. Must be
    /// called inside a tokio runtime.
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        paths: PipelinePaths,
        identity: PodIdentity,
    ) -> Self {
        let core = Arc::new(PipelineCore {
            launcher,
            paths,
            identity,
            symbol_root: parking_lot::RwLock::new(None),
            slots: Mutex::new(PipelineSlots {
                state: PipelineState::Idle,
                recorder: None,
                window: RecordingWindow::default(),
            }),
        });

        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_worker(core.clone(), rx));

        Self { core, jobs }
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.core.paths
    }

    pub fn set_symbol_root(&self, root: Option<PathBuf>) {
        *self.core.symbol_root.write() = root;
    }

    pub fn symbol_root(&self) -> Option<PathBuf> {
        self.core.symbol_root.read().clone()
    }

    /// Start the recorder.
    pub async fn record(&self, target: TargetSelector) -> Result<RecordHandle, PipelineError> {
        {
            let slots = self.core.slots.lock().await;
            if slots.state.is_busy() {
                return Err(PipelineError::AlreadyRunning(slots.state.token().to_string()));
            }
        }

        let pids = match &target {
            TargetSelector::WholeSystem => None,
            TargetSelector::ProcessPattern(pattern) => Some(self.resolve_pids(pattern).await?),
        };

        let mut slots = self.core.slots.lock().await;
        // Re-check: a concurrent record may have won while pgrep ran.
        if slots.state.is_busy() {
            return Err(PipelineError::AlreadyRunning(slots.state.token().to_string()));
        }

        self.backup_artifact();

        let step = self.record_step(pids.as_deref());
        let recorder = match self.core.launcher.launch(&step).await {
            Ok(recorder) => recorder,
            Err(e) => {
                let err = PipelineError::from(e);
                error!(error = %err, "Failed to start recorder");
                slots.state = PipelineState::Error(err.to_string());
                return Err(err);
            }
        };

        let started_at = Utc::now();
        let pid = recorder.pid();
        slots.state = PipelineState::Recording;
        slots.window = RecordingWindow::started(started_at);
        slots.recorder = Some(recorder);

        metrics::counter!("furnace_recordings_started_total").increment(1);
        info!(?pid, target = ?target, "Recording started");

        Ok(RecordHandle {
            pid,
            started_at,
            target,
        })
    }

    /// Signal the recorder and queue the post-processing chain.
    pub async fn stop(&self, options: PostProcessOptions) -> Result<PipelineCompletion, PipelineError> {
        let mut slots = self.core.slots.lock().await;
        if slots.state != PipelineState::Recording {
            return Err(PipelineError::NotRunning(slots.state.token().to_string()));
        }
        let Some(mut recorder) = slots.recorder.take() else {
            return Err(PipelineError::AlreadyStopping);
        };

        if let Err(e) = recorder.request_stop() {
            warn!(error = %e, "Failed to signal recorder, waiting for it to exit anyway");
        }
        slots.window.ended_at = Some(Utc::now());

        let (done, rx) = oneshot::channel();
        let job = PostProcessJob {
            recorder,
            options,
            done,
        };
        if self.jobs.send(job).is_err() {
            let err = PipelineError::WorkerUnavailable;
            slots.state = PipelineState::Error(err.to_string());
            return Err(err);
        }

        info!("Recording stopped, post-processing queued");
        Ok(PipelineCompletion { rx })
    }

    pub async fn status(&self) -> PipelineState {
        self.core.slots.lock().await.state.clone()
    }

    pub async fn window(&self) -> RecordingWindow {
        self.core.slots.lock().await.window
    }

    /// Snapshot of state and window taken under one lock.
    pub async fn snapshot(&self) -> (PipelineState, RecordingWindow) {
        let slots = self.core.slots.lock().await;
        (slots.state.clone(), slots.window)
    }

    /// Run `flamegraph.pl` over the collapsed stacks into the artifact path.
    pub async fn render(&self, options: &PostProcessOptions) -> Result<PathBuf, PipelineError> {
        let window = self.window().await;
        Self::render_with(&self.core, options, window).await
    }

    /// Run `pgrep <pattern>` and return the comma-joined pid list.
    ///
    /// Each call captures into its own file, renamed to `pids` once read, so
    /// concurrent starts never see each other's output.
    pub async fn resolve_pids(&self, pattern: &str) -> Result<String, PipelineError> {
        let paths = &self.core.paths;
        let capture = paths.output_dir.join(format!(".pids-{}", Uuid::new_v4()));
        let step = ProcessStep::new(PGREP_STEP, &paths.pgrep_binary)
            .arg(pattern)
            .stdout_to(&capture);

        let captured = capture_pids(self.core.launcher.as_ref(), &step, pattern, &capture).await;
        if captured.is_ok() {
            if let Err(e) = tokio::fs::rename(&capture, paths.pids()).await {
                warn!(error = %e, "Failed to publish pid list");
            }
        } else {
            let _ = tokio::fs::remove_file(&capture).await;
        }

        let contents = captured?;
        let pids: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if pids.is_empty() {
            warn!(pattern, "pgrep succeeded but returned no pids");
            return Err(PipelineError::NoTargetFound(pattern.to_string()));
        }

        info!(pattern, pids = ?pids, "Recording data from pids");
        Ok(pids.join(","))
    }

    /// Move an existing artifact to the first free `perf.N.svg`. Failures are
    /// logged; the new recording proceeds either way.
    pub fn backup_artifact(&self) -> Option<PathBuf> {
        let target = self.core.paths.artifact();
        if !target.exists() {
            return None;
        }

        let backup = (0u32..)
            .map(|n| self.core.paths.output_dir.join(format!("perf.{}.svg", n)))
            .find(|candidate| !candidate.exists())?;

        match std::fs::rename(&target, &backup) {
            Ok(()) => {
                info!(from = %target.display(), to = %backup.display(), "Backed up previous chart");
                Some(backup)
            }
            Err(e) => {
                error!(error = %e, to = %backup.display(), "Failed to back up previous chart");
                None
            }
        }
    }

    fn record_step(&self, pids: Option<&str>) -> ProcessStep {
        let paths = &self.core.paths;
        let step = ProcessStep::new(RECORD_STEP, &paths.perf_binary)
            .args(["record", "-g", "-F", SAMPLING_FREQUENCY, "-o"])
            .arg(paths.perf_data().to_string_lossy());
        match pids {
            None => step.arg("-a"),
            Some(pids) => step.arg("-p").arg(pids),
        }
    }

    async fn run_worker(core: Arc<PipelineCore>, mut jobs: mpsc::UnboundedReceiver<PostProcessJob>) {
        debug!("Post-processing worker started");
        while let Some(job) = jobs.recv().await {
            let PostProcessJob {
                recorder,
                options,
                done,
            } = job;

            let result = Self::run_chain(&core, recorder, &options).await;
            let outcome = match &result {
                Ok(()) => "success",
                Err(_) => "error",
            };
            metrics::counter!("furnace_pipeline_runs_total", "outcome" => outcome).increment(1);

            if let Err(e) = &result {
                error!(error = %e, "Post-processing failed");
                core.slots.lock().await.state = PipelineState::Error(e.to_string());
            }
            // The caller may have dropped its completion handle.
            let _ = done.send(result);
        }
        debug!("Post-processing worker stopped");
    }

    async fn run_chain(
        core: &Arc<PipelineCore>,
        mut recorder: Box<dyn RunningProcess>,
        options: &PostProcessOptions,
    ) -> Result<(), PipelineError> {
        let outcome = recorder.wait().await?;
        if !outcome.is_clean_or_stopped() {
            return Err(PipelineError::SubprocessNonZeroExit {
                step: RECORD_STEP.to_string(),
                outcome,
            });
        }
        debug!(%outcome, "Recorder exited");

        let window = {
            let mut slots = core.slots.lock().await;
            slots.state = PipelineState::Scripting;
            slots.window
        };

        let script = Self::script_step(core, options);
        require_success(core.launcher.as_ref(), &script).await?;

        for file in discover_scripts(core.paths.scripts_dir()) {
            Self::run_aux_script(core, &file).await;
        }

        core.slots.lock().await.state = PipelineState::Collapsing;
        let collapse = ProcessStep::new(COLLAPSE_STEP, core.paths.stackcollapse())
            .arg(core.paths.perf_script().to_string_lossy())
            .stdout_to(core.paths.collapsed());
        require_success(core.launcher.as_ref(), &collapse).await?;

        core.slots.lock().await.state = PipelineState::Rendering;
        let artifact = Self::render_with(core, options, window).await?;

        core.slots.lock().await.state = PipelineState::Idle;
        info!(artifact = %artifact.display(), "Written flame graph");
        Ok(())
    }

    fn script_step(core: &PipelineCore, options: &PostProcessOptions) -> ProcessStep {
        let paths = &core.paths;
        let mut step = ProcessStep::new(SCRIPT_STEP, &paths.perf_binary)
            .args(["script", "-i"])
            .arg(paths.perf_data().to_string_lossy())
            .arg(format!("--kallsyms={}", paths.kallsyms.display()))
            .stdout_to(paths.perf_script());

        if options.symbols_from_image {
            match core.symbol_root.read().as_ref() {
                Some(root) => step = step.arg(format!("--symfs={}", root.display())),
                None => warn!("Symbols from image requested but no image is mounted"),
            }
        }
        step
    }

    async fn run_aux_script(core: &PipelineCore, file: &Path) {
        let label = format!(
            "script {}",
            file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );
        let step = ProcessStep::new(label, &core.paths.bash_binary).arg(file.to_string_lossy());

        info!(script = %file.display(), "Executing post-processing script");
        match run_to_completion(core.launcher.as_ref(), &step).await {
            Ok(outcome) if outcome.success() => {}
            Ok(outcome) => warn!(script = %file.display(), %outcome, "Post-processing script failed"),
            Err(e) => warn!(script = %file.display(), error = %e, "Failed to execute post-processing script"),
        }
    }

    async fn render_with(
        core: &PipelineCore,
        options: &PostProcessOptions,
        window: RecordingWindow,
    ) -> Result<PathBuf, PipelineError> {
        let paths = &core.paths;
        let mut step = ProcessStep::new(RENDER_STEP, paths.flamegraph());
        if options.width > 0 {
            step = step.arg("--width").arg(options.width.to_string());
        }
        if !options.colors.is_empty() {
            step = step.arg("--colors").arg(options.colors.as_str());
        }
        if options.inverted {
            step = step.arg("--inverted");
        }
        let title = window.title(&core.identity.namespace, &core.identity.name);
        let step = step
            .arg("--title")
            .arg(title)
            .arg(paths.collapsed().to_string_lossy())
            .stdout_to(paths.artifact());

        info!(
            width = options.width,
            colors = %options.colors,
            inverted = options.inverted,
            "Creating flame graph"
        );
        require_success(core.launcher.as_ref(), &step).await?;
        Ok(paths.artifact())
    }
}

async fn run_to_completion(
    launcher: &dyn ProcessLauncher,
    step: &ProcessStep,
) -> Result<ExitOutcome, PipelineError> {
    let mut process = launcher.launch(step).await?;
    Ok(process.wait().await?)
}

async fn capture_pids(
    launcher: &dyn ProcessLauncher,
    step: &ProcessStep,
    pattern: &str,
    capture: &Path,
) -> Result<String, PipelineError> {
    match run_to_completion(launcher, step).await? {
        ExitOutcome::Code(0) => {}
        ExitOutcome::Code(1) => {
            warn!(pattern, "No processes match pattern");
            return Err(PipelineError::NoTargetFound(pattern.to_string()));
        }
        other => {
            return Err(PipelineError::SubprocessNonZeroExit {
                step: PGREP_STEP.to_string(),
                outcome: other,
            })
        }
    }
    Ok(tokio::fs::read_to_string(capture).await?)
}

async fn require_success(launcher: &dyn ProcessLauncher, step: &ProcessStep) -> Result<(), PipelineError> {
    let outcome = run_to_completion(launcher, step).await?;
    if outcome.success() {
        Ok(())
    } else {
        Err(PipelineError::SubprocessNonZeroExit {
            step: step.label.clone(),
            outcome,
        })
    }
}

/// Executable `*.sh` files in `dir`, sorted by name. Hidden and non-regular
/// entries are skipped; a missing directory yields nothing.
pub fn discover_scripts(dir: &Path) -> Vec<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "No post-processing scripts directory");
            return Vec::new();
        }
    };

    let mut scripts: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".sh") {
                debug!(file = %name, "Ignoring non-shell script");
                return None;
            }
            let path = entry.path();
            let metadata = std::fs::metadata(&path).ok()?;
            (metadata.is_file() && metadata.permissions().mode() & 0o111 != 0).then_some(path)
        })
        .collect();

    scripts.sort();
    scripts
}
