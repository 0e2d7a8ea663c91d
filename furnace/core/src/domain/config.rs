// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

// Agent & Proxy Configuration
//
// Immutable configuration values built once at process start (see the `furnace`
// CLI) and handed to each component's constructor:
// - Pod identity used for registration and chart titles
// - Well-known pipeline paths (output files, scripts, FlameGraph tools)
// - Autostart / autostop / autorestart policy
// - Reference image setup used for symbol resolution
// - Proxy lease settings

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port agents listen on when a registration does not say otherwise.
pub const DEFAULT_AGENT_PORT: u16 = 12380;

/// Default lease granted by the proxy, in seconds.
pub const DEFAULT_LEASE_SECONDS: u64 = 30;

/// Delay before retrying a failed registration, in seconds.
pub const DEFAULT_REGISTRATION_RETRY_SECONDS: u64 = 30;

/// Identity of the pod this agent profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdentity {
    pub name: String,
    pub namespace: String,
    /// Address other pods can reach this agent on. Required for registration.
    pub ip: Option<String>,
}

/// Locations of the pipeline's tools and files.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    /// Directory holding the capture, intermediate files and the chart.
    pub output_dir: PathBuf,

    /// Directory scanned for auxiliary `*.sh` post-processing scripts.
    pub scripts_dir: PathBuf,

    /// Checkout of Brendan Gregg's FlameGraph tools.
    pub flamegraph_dir: PathBuf,

    pub perf_binary: PathBuf,
    pub pgrep_binary: PathBuf,
    pub bash_binary: PathBuf,
    pub kallsyms: PathBuf,
}

impl Default for PipelinePaths {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/out"),
            scripts_dir: PathBuf::from("/scripts"),
            flamegraph_dir: PathBuf::from("/root/FlameGraph"),
            perf_binary: PathBuf::from("perf"),
            pgrep_binary: PathBuf::from("pgrep"),
            bash_binary: PathBuf::from("bash"),
            kallsyms: PathBuf::from("/proc/kallsyms"),
        }
    }
}

impl PipelinePaths {
    /// Default layout rooted at a different output directory.
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn perf_data(&self) -> PathBuf {
        self.output_dir.join("perf.data")
    }

    pub fn perf_script(&self) -> PathBuf {
        self.output_dir.join("perf.script")
    }

    pub fn collapsed(&self) -> PathBuf {
        self.output_dir.join("perf.collapsed")
    }

    /// Canonical location of the rendered flame graph.
    pub fn artifact(&self) -> PathBuf {
        self.output_dir.join("perf.svg")
    }

    pub fn pids(&self) -> PathBuf {
        self.output_dir.join("pids")
    }

    pub fn mountpoint(&self) -> PathBuf {
        self.output_dir.join("mountpoint")
    }

    pub fn stackcollapse(&self) -> PathBuf {
        self.flamegraph_dir.join("stackcollapse-perf.pl")
    }

    pub fn flamegraph(&self) -> PathBuf {
        self.flamegraph_dir.join("flamegraph.pl")
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }
}

/// What happens after an automatic start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStopMode {
    /// Recording runs until someone calls stop.
    Manual,
    /// Stop once, this long after the start.
    StopAfter(Duration),
    /// Stop, wait for the chart, and start again, forever.
    RestartEvery(Duration),
}

/// Autostart rule evaluated once at agent startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoStartPolicy {
    /// Pod name patterns; each may contain a single `*` wildcard.
    pub patterns: Vec<String>,
    pub delay: Option<Duration>,
    pub mode: AutoStopMode,
}

impl AutoStartPolicy {
    /// Build a policy from the raw settings. `autostop_seconds` takes precedence
    /// over `autorestart_seconds`; the two are mutually exclusive.
    pub fn new(
        patterns: &str,
        delay_seconds: Option<u64>,
        autostop_seconds: Option<u64>,
        autorestart_seconds: Option<u64>,
    ) -> Self {
        let mode = match (autostop_seconds, autorestart_seconds) {
            (Some(stop), _) => AutoStopMode::StopAfter(Duration::from_secs(stop)),
            (None, Some(restart)) if restart > 0 => {
                AutoStopMode::RestartEvery(Duration::from_secs(restart))
            }
            _ => AutoStopMode::Manual,
        };

        Self {
            patterns: patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            delay: delay_seconds.map(Duration::from_secs),
            mode,
        }
    }

    pub fn matches(&self, pod_name: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| matches_name_pattern(pattern, pod_name))
    }
}

/// Match `name` against `pattern`, where the pattern is either a literal or
/// `prefix*suffix` with a single wildcard.
pub fn matches_name_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

/// Mounting of the profiled container's image, used as the `--symfs` root.
#[derive(Debug, Clone)]
pub struct ImageSetup {
    /// When false the agent is ready immediately and symbols are never resolved
    /// against an image.
    pub pull_enabled: bool,
    pub main_image: Option<String>,
    pub podman_binary: PathBuf,
    pub container_name: String,
    /// Lock file podman's VFS driver expects to exist before the first pull.
    pub storage_lock: PathBuf,
}

impl Default for ImageSetup {
    fn default() -> Self {
        Self {
            pull_enabled: true,
            main_image: None,
            podman_binary: PathBuf::from("podman"),
            container_name: "main-container".to_string(),
            storage_lock: PathBuf::from("/containers/storage/vfs-images/images.lock"),
        }
    }
}

/// Configuration of a profiling agent (sidecar).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub identity: PodIdentity,
    /// Port the agent's HTTP API listens on; also advertised in registrations.
    pub port: u16,
    pub paths: PipelinePaths,
    /// Default process-name filter when a start request does not carry one.
    pub process_pattern: Option<String>,
    pub autostart: Option<AutoStartPolicy>,
    pub image: ImageSetup,
    /// Base URL of the proxy; `None` disables registration.
    pub registry_url: Option<String>,
    pub registration_retry: Duration,
}

impl AgentConfig {
    pub fn new(identity: PodIdentity) -> Self {
        Self {
            identity,
            port: DEFAULT_AGENT_PORT,
            paths: PipelinePaths::default(),
            process_pattern: None,
            autostart: None,
            image: ImageSetup::default(),
            registry_url: None,
            registration_retry: Duration::from_secs(DEFAULT_REGISTRATION_RETRY_SECONDS),
        }
    }
}

/// Configuration of the central proxy (registry + router).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub lease: Duration,
    pub default_agent_port: u16,
    pub port: u16,
    /// Upper bound on a single forwarded request.
    pub forward_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(DEFAULT_LEASE_SECONDS),
            default_agent_port: DEFAULT_AGENT_PORT,
            port: 8080,
            forward_timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        assert!(matches_name_pattern("web-0", "web-0"));
        assert!(!matches_name_pattern("web-0", "web-1"));
    }

    #[test]
    fn test_wildcard_pattern() {
        assert!(matches_name_pattern("web-*", "web-7f9c-x2"));
        assert!(matches_name_pattern("*-x2", "web-7f9c-x2"));
        assert!(matches_name_pattern("web*x2", "web-7f9c-x2"));
        assert!(matches_name_pattern("*", "anything"));
        assert!(!matches_name_pattern("db-*", "web-0"));
    }

    #[test]
    fn test_wildcard_prefix_and_suffix_cannot_overlap() {
        assert!(!matches_name_pattern("ab*ba", "aba"));
        assert!(matches_name_pattern("ab*ba", "abba"));
    }

    #[test]
    fn test_policy_splits_pattern_list() {
        let policy = AutoStartPolicy::new("db-0, web-*", None, None, None);
        assert_eq!(policy.patterns, vec!["db-0", "web-*"]);
        assert!(policy.matches("web-3"));
        assert!(policy.matches("db-0"));
        assert!(!policy.matches("db-1"));
        assert_eq!(policy.mode, AutoStopMode::Manual);
    }

    #[test]
    fn test_autostop_wins_over_autorestart() {
        let policy = AutoStartPolicy::new("*", Some(5), Some(60), Some(300));
        assert_eq!(policy.mode, AutoStopMode::StopAfter(Duration::from_secs(60)));
        assert_eq!(policy.delay, Some(Duration::from_secs(5)));

        let policy = AutoStartPolicy::new("*", None, None, Some(300));
        assert_eq!(
            policy.mode,
            AutoStopMode::RestartEvery(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_pipeline_paths_layout() {
        let paths = PipelinePaths::with_output_dir("/tmp/furnace");
        assert_eq!(paths.artifact(), PathBuf::from("/tmp/furnace/perf.svg"));
        assert_eq!(paths.collapsed(), PathBuf::from("/tmp/furnace/perf.collapsed"));
        assert_eq!(
            paths.flamegraph(),
            PathBuf::from("/root/FlameGraph/flamegraph.pl")
        );
    }
}
