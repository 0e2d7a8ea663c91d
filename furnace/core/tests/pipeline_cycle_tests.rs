// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end runs of the profiling pipeline against scripted tools.
//!
//! Every external tool is replaced by `ScriptedLauncher`, which writes canned
//! stdout into the redirect target, so the files a run leaves behind in the
//! output directory are the same ones real tools would produce.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use furnace_core::application::pipeline::{
    ProcessPipeline, COLLAPSE_STEP, RECORD_STEP, RENDER_STEP, SCRIPT_STEP,
};
use furnace_core::domain::config::{PipelinePaths, PodIdentity};
use furnace_core::domain::pipeline::{PipelineError, PipelineState, PostProcessOptions, TargetSelector};
use furnace_core::domain::process::ExitOutcome;
use furnace_core::infrastructure::scripted::{ScriptedBehaviour, ScriptedLauncher};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    launcher: Arc<ScriptedLauncher>,
    pipeline: ProcessPipeline,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new());
        launcher.set(RECORD_STEP, ScriptedBehaviour::until_stopped());
        launcher.set(SCRIPT_STEP, ScriptedBehaviour::exit(0).with_stdout("java 1 cpu-clock:\n"));
        launcher.set(COLLAPSE_STEP, ScriptedBehaviour::exit(0).with_stdout("java;main 1\n"));
        launcher.set(RENDER_STEP, ScriptedBehaviour::exit(0).with_stdout("<svg>chart</svg>"));

        let mut paths = PipelinePaths::with_output_dir(dir.path());
        paths.scripts_dir = dir.path().join("scripts");
        let identity = PodIdentity {
            name: "web-0".into(),
            namespace: "shop".into(),
            ip: Some("10.0.0.7".into()),
        };
        let pipeline = ProcessPipeline::new(launcher.clone(), paths, identity);

        Self {
            dir,
            launcher,
            pipeline,
        }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn add_script(&self, name: &str, mode: u32) {
        let scripts = self.dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        let path = scripts.join(name);
        std::fs::write(&path, "#!/bin/bash\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    async fn cycle(&self, options: PostProcessOptions) -> Result<(), PipelineError> {
        self.pipeline.record(TargetSelector::WholeSystem).await?;
        self.pipeline.stop(options).await?.wait().await
    }
}

#[tokio::test]
async fn test_clean_cycle_produces_artifact() {
    let h = Harness::new();

    h.pipeline.record(TargetSelector::WholeSystem).await.unwrap();
    assert_eq!(h.pipeline.status().await, PipelineState::Recording);

    let completion = h.pipeline.stop(PostProcessOptions::default()).await.unwrap();
    completion.wait().await.unwrap();

    assert_eq!(h.pipeline.status().await, PipelineState::Idle);
    assert_eq!(
        std::fs::read_to_string(h.file("perf.svg")).unwrap(),
        "<svg>chart</svg>"
    );
    assert_eq!(
        h.launcher.launched_labels(),
        vec![RECORD_STEP, SCRIPT_STEP, COLLAPSE_STEP, RENDER_STEP]
    );
    assert_eq!(h.launcher.stop_requests(), vec![RECORD_STEP]);

    let window = h.pipeline.window().await;
    assert!(window.started_at.is_some());
    assert!(window.ended_at >= window.started_at);
}

#[tokio::test]
async fn test_start_while_busy_is_rejected() {
    let h = Harness::new();
    h.pipeline.record(TargetSelector::WholeSystem).await.unwrap();

    let err = h.pipeline.record(TargetSelector::WholeSystem).await.unwrap_err();

    assert!(matches!(err, PipelineError::AlreadyRunning(ref s) if s == "perf record"));
    assert_eq!(h.pipeline.status().await, PipelineState::Recording);
    assert_eq!(h.launcher.launched_labels(), vec![RECORD_STEP]);
}

#[tokio::test]
async fn test_stages_run_in_order_and_reject_starts() {
    let h = Harness::new();
    let delay = Duration::from_millis(150);
    h.launcher.set(
        SCRIPT_STEP,
        ScriptedBehaviour::exit(0).with_stdout("java 1 cpu-clock:\n").with_delay(delay),
    );
    h.launcher.set(
        COLLAPSE_STEP,
        ScriptedBehaviour::exit(0).with_stdout("java;main 1\n").with_delay(delay),
    );
    h.launcher.set(
        RENDER_STEP,
        ScriptedBehaviour::exit(0).with_stdout("<svg>chart</svg>").with_delay(delay),
    );

    h.pipeline.record(TargetSelector::WholeSystem).await.unwrap();
    let mut seen = vec![h.pipeline.status().await.token().to_string()];
    let completion = h.pipeline.stop(PostProcessOptions::default()).await.unwrap();

    let mut rejected: Vec<String> = Vec::new();
    for _ in 0..400 {
        let state = h.pipeline.status().await;
        let token = state.token().to_string();
        if seen.last() != Some(&token) {
            seen.push(token.clone());
        }
        if state == PipelineState::Idle {
            break;
        }
        if state != PipelineState::Recording && !rejected.contains(&token) {
            match h.pipeline.record(TargetSelector::WholeSystem).await {
                Err(PipelineError::AlreadyRunning(current)) => rejected.push(current),
                other => panic!("start during {token} was not rejected: {other:?}"),
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    completion.wait().await.unwrap();

    assert_eq!(
        seen,
        vec!["perf record", "perf script", "stackcollapse", "flamegraph", "idle"]
    );
    assert_eq!(rejected, vec!["perf script", "stackcollapse", "flamegraph"]);
    // Rejected starts never launched a second recorder.
    assert_eq!(
        h.launcher.launched_labels(),
        vec![RECORD_STEP, SCRIPT_STEP, COLLAPSE_STEP, RENDER_STEP]
    );
    assert_eq!(
        std::fs::read_to_string(h.file("perf.svg")).unwrap(),
        "<svg>chart</svg>"
    );
}

#[tokio::test]
async fn test_stop_when_idle_is_rejected() {
    let h = Harness::new();
    let err = h.pipeline.stop(PostProcessOptions::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "Not running: current status is: idle");
}

#[tokio::test]
async fn test_second_stop_while_recorder_exits() {
    let h = Harness::new();
    h.launcher.set(
        RECORD_STEP,
        ScriptedBehaviour::until_stopped().with_delay(Duration::from_millis(300)),
    );
    h.pipeline.record(TargetSelector::WholeSystem).await.unwrap();

    let completion = h.pipeline.stop(PostProcessOptions::default()).await.unwrap();
    let err = h.pipeline.stop(PostProcessOptions::default()).await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyStopping));
    assert_eq!(h.pipeline.status().await.token(), "perf record");

    completion.wait().await.unwrap();
    assert_eq!(h.pipeline.status().await, PipelineState::Idle);
}

#[tokio::test]
async fn test_bad_recorder_exit_stops_chain() {
    let h = Harness::new();
    h.launcher.set(
        RECORD_STEP,
        ScriptedBehaviour::until_stopped().with_outcome(ExitOutcome::Code(1)),
    );

    let err = h.cycle(PostProcessOptions::default()).await.unwrap_err();

    assert_eq!(err.to_string(), "Non-zero return code from `perf record`: 1");
    assert_eq!(
        h.pipeline.status().await,
        PipelineState::Error("Non-zero return code from `perf record`: 1".into())
    );
    assert!(!h.file("perf.script").exists());
    assert!(!h.file("perf.collapsed").exists());
    assert!(!h.file("perf.svg").exists());
    assert_eq!(h.launcher.launched_labels(), vec![RECORD_STEP]);
}

#[tokio::test]
async fn test_recorder_killed_by_sigterm_is_accepted() {
    let h = Harness::new();
    h.launcher.set(
        RECORD_STEP,
        ScriptedBehaviour::until_stopped().with_outcome(ExitOutcome::Signal(15)),
    );

    h.cycle(PostProcessOptions::default()).await.unwrap();
    assert_eq!(h.pipeline.status().await, PipelineState::Idle);
}

#[tokio::test]
async fn test_failed_step_sets_error_then_restart_clears_it() {
    let h = Harness::new();
    h.launcher.set(SCRIPT_STEP, ScriptedBehaviour::exit(2));

    h.cycle(PostProcessOptions::default()).await.unwrap_err();
    let state = h.pipeline.status().await;
    assert_eq!(state.token(), "Non-zero return code from `perf script`: 2");
    assert!(!h.file("perf.collapsed").exists());

    // Start is allowed from the error state and clears the message.
    h.launcher.set(SCRIPT_STEP, ScriptedBehaviour::exit(0));
    h.pipeline.record(TargetSelector::WholeSystem).await.unwrap();
    assert_eq!(h.pipeline.status().await, PipelineState::Recording);

    h.pipeline
        .stop(PostProcessOptions::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(h.pipeline.status().await.token(), "idle");
}

#[tokio::test]
async fn test_recorder_spawn_failure() {
    let h = Harness::new();
    h.launcher
        .set(RECORD_STEP, ScriptedBehaviour::spawn_failure("No such file or directory"));

    let err = h.pipeline.record(TargetSelector::WholeSystem).await.unwrap_err();

    assert!(matches!(err, PipelineError::SubprocessSpawnFailed { .. }));
    let state = h.pipeline.status().await;
    assert!(state.token().starts_with("Failed to start `perf record`"));
}

#[tokio::test]
async fn test_no_matching_process_leaves_state_unchanged() {
    let h = Harness::new();
    h.launcher.set("pgrep", ScriptedBehaviour::exit(0).with_stdout("\n"));

    let err = h
        .pipeline
        .record(TargetSelector::ProcessPattern("ghost".into()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoTargetFound(_)));
    assert_eq!(h.pipeline.status().await, PipelineState::Idle);
    assert_eq!(h.launcher.launched_labels(), vec!["pgrep"]);
}

#[tokio::test]
async fn test_each_start_backs_up_previous_chart() {
    let h = Harness::new();

    h.cycle(PostProcessOptions::default()).await.unwrap();
    h.cycle(PostProcessOptions::default()).await.unwrap();
    h.pipeline.record(TargetSelector::WholeSystem).await.unwrap();

    assert!(h.file("perf.0.svg").exists());
    assert!(h.file("perf.1.svg").exists());
    assert!(!h.file("perf.svg").exists());
}

#[tokio::test]
async fn test_aux_scripts_run_in_order_and_failures_are_ignored() {
    let h = Harness::new();
    h.add_script("20-annotate.sh", 0o755);
    h.add_script("10-filter.sh", 0o755);
    h.add_script("30-disabled.sh", 0o644);
    h.launcher
        .set("script 10-filter.sh", ScriptedBehaviour::exit(1));

    h.cycle(PostProcessOptions::default()).await.unwrap();

    assert_eq!(
        h.launcher.launched_labels(),
        vec![
            RECORD_STEP,
            SCRIPT_STEP,
            "script 10-filter.sh",
            "script 20-annotate.sh",
            COLLAPSE_STEP,
            RENDER_STEP
        ]
    );
    let bash = &h.launcher.launched()[2];
    assert_eq!(bash.program, PathBuf::from("bash"));
    assert_eq!(
        bash.args,
        vec![h.dir.path().join("scripts/10-filter.sh").to_string_lossy().into_owned()]
    );
    assert_eq!(h.pipeline.status().await, PipelineState::Idle);
}

#[tokio::test]
async fn test_symbols_from_mounted_image() {
    let h = Harness::new();
    h.pipeline.set_symbol_root(Some(PathBuf::from("/mnt/web")));

    let options = PostProcessOptions {
        symbols_from_image: true,
        ..PostProcessOptions::default()
    };
    h.cycle(options).await.unwrap();

    let script = h
        .launcher
        .launched()
        .into_iter()
        .find(|s| s.label == SCRIPT_STEP)
        .unwrap();
    assert!(script.args.contains(&"--kallsyms=/proc/kallsyms".to_string()));
    assert!(script.args.contains(&"--symfs=/mnt/web".to_string()));
}

#[tokio::test]
async fn test_symbols_requested_without_mount_are_skipped() {
    let h = Harness::new();

    let options = PostProcessOptions {
        symbols_from_image: true,
        ..PostProcessOptions::default()
    };
    h.cycle(options).await.unwrap();

    let script = h
        .launcher
        .launched()
        .into_iter()
        .find(|s| s.label == SCRIPT_STEP)
        .unwrap();
    assert!(!script.args.iter().any(|a| a.starts_with("--symfs")));
}

#[tokio::test]
async fn test_recording_a_pattern_targets_its_pids() {
    let h = Harness::new();
    h.launcher
        .set("pgrep", ScriptedBehaviour::exit(0).with_stdout("311\n312\n"));

    let handle = h
        .pipeline
        .record(TargetSelector::ProcessPattern("java".into()))
        .await
        .unwrap();

    assert!(handle.pid.is_some());
    let record = h.launcher.launched().pop().unwrap();
    assert_eq!(record.label, RECORD_STEP);
    assert!(record.args.ends_with(&["-p".to_string(), "311,312".to_string()]));
    assert_eq!(std::fs::read_to_string(h.file("pids")).unwrap(), "311\n312\n");
}
