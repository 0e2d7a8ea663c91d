// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Mounts the profiled container's image with podman so `perf script` can
//! resolve symbols against the same binaries (`--symfs`).
//!
//! A throwaway container running `tail -f /dev/null` keeps the image in use;
//! `podman mount` then prints the root filesystem path.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::domain::config::ImageSetup;
use crate::domain::process::{ExitOutcome, ProcessError, ProcessLauncher, ProcessStep};

#[derive(Debug, Error)]
pub enum MountError {
    #[error("no main image configured")]
    NoImage,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("`{step}` exited with {outcome}")]
    NonZeroExit { step: String, outcome: ExitOutcome },

    #[error("podman reported an empty mount point")]
    EmptyMountPoint,

    #[error("failed to read mount point: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ImageMounter {
    launcher: Arc<dyn ProcessLauncher>,
    setup: ImageSetup,
    /// File receiving `podman mount` output.
    mountpoint_file: PathBuf,
}

impl ImageMounter {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        setup: ImageSetup,
        mountpoint_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            launcher,
            setup,
            mountpoint_file: mountpoint_file.into(),
        }
    }

    /// Start the holder container and return its mounted root.
    pub async fn mount(&self) -> Result<PathBuf, MountError> {
        let image = self.setup.main_image.as_deref().ok_or(MountError::NoImage)?;

        self.ensure_storage_lock();

        let podman = &self.setup.podman_binary;
        let run = ProcessStep::new("podman run", podman)
            .args(["run", "-d", "--rm", "--name"])
            .arg(self.setup.container_name.as_str())
            .args(["--cgroup-manager=cgroupfs", "--entrypoint", "tail"])
            .arg(image)
            .args(["-f", "/dev/null"]);
        self.run(&run).await?;

        let mount = ProcessStep::new("podman mount", podman)
            .arg("mount")
            .arg(self.setup.container_name.as_str())
            .stdout_to(&self.mountpoint_file);
        self.run(&mount).await?;

        let raw = tokio::fs::read_to_string(&self.mountpoint_file).await?;
        let mount_point = raw.trim();
        if mount_point.is_empty() {
            return Err(MountError::EmptyMountPoint);
        }

        info!(image, mount_point, "Container image mounted");
        Ok(PathBuf::from(mount_point))
    }

    /// podman's VFS driver refuses to pull until its lock file exists.
    fn ensure_storage_lock(&self) {
        let lock = &self.setup.storage_lock;
        if lock.exists() {
            return;
        }
        let created = lock
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::File::create(lock).map(|_| ()));
        if let Err(e) = created {
            error!(path = %lock.display(), error = %e, "Failed to initialize VFS images lock file");
        }
    }

    async fn run(&self, step: &ProcessStep) -> Result<(), MountError> {
        let outcome = self.launcher.launch(step).await?.wait().await?;
        if outcome.success() {
            Ok(())
        } else {
            Err(MountError::NonZeroExit {
                step: step.label.clone(),
                outcome,
            })
        }
    }
}
