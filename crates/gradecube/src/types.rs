use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource limits for one sandbox run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock budget for the container in seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Hard memory ceiling in megabytes (swap is pinned to the same value)
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,

    /// CPU quota in microseconds per period
    #[serde(default)]
    pub cpu_quota_us: Option<u64>,

    /// CPU scheduling period in microseconds
    #[serde(default)]
    pub cpu_period_us: Option<u64>,

    /// Maximum number of processes/threads inside the container
    #[serde(default)]
    pub pids_limit: Option<u32>,

    /// Maximum bytes collected from each of stdout and stderr
    #[serde(default)]
    pub max_output_bytes: Option<u64>,
}

impl ResourceLimits {
    /// Default wall clock budget when nothing else is configured
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
    /// Default memory ceiling when nothing else is configured
    pub const DEFAULT_MEMORY_MB: u64 = 128;
    /// Default per-stream output cap when nothing else is configured
    pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 1024 * 1024;
    /// Longest wall clock budget any run may ask for
    pub const MAX_TIMEOUT_SECONDS: u64 = 300;
    /// Smallest memory ceiling the container engine accepts
    pub const MIN_MEMORY_MB: u64 = 6;
    /// Largest memory ceiling any run may ask for
    pub const MAX_MEMORY_MB: u64 = 4096;

    /// Create new resource limits with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, used as an override layer
    pub fn unset() -> Self {
        Self {
            timeout_seconds: None,
            memory_limit_mb: None,
            cpu_quota_us: None,
            cpu_period_us: None,
            pids_limit: None,
            max_output_bytes: None,
        }
    }

    /// Set the wall clock budget in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Set the memory ceiling in megabytes
    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// Set the CPU quota and period in microseconds
    pub fn with_cpu_quota(mut self, quota_us: u64, period_us: u64) -> Self {
        self.cpu_quota_us = Some(quota_us);
        self.cpu_period_us = Some(period_us);
        self
    }

    /// Set the process limit
    pub fn with_pids_limit(mut self, count: u32) -> Self {
        self.pids_limit = Some(count);
        self
    }

    /// Set the per-stream output cap in bytes
    pub fn with_max_output(mut self, bytes: u64) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            timeout_seconds: overrides.timeout_seconds.or(self.timeout_seconds),
            memory_limit_mb: overrides.memory_limit_mb.or(self.memory_limit_mb),
            cpu_quota_us: overrides.cpu_quota_us.or(self.cpu_quota_us),
            cpu_period_us: overrides.cpu_period_us.or(self.cpu_period_us),
            pids_limit: overrides.pids_limit.or(self.pids_limit),
            max_output_bytes: overrides.max_output_bytes.or(self.max_output_bytes),
        }
    }

    /// Drop zero values and clamp the rest into the supported ranges
    ///
    /// A dropped value falls back to the next layer when merged with
    /// [`Self::with_overrides`].
    pub fn sanitized(&self) -> ResourceLimits {
        ResourceLimits {
            timeout_seconds: self
                .timeout_seconds
                .filter(|&t| t > 0)
                .map(|t| t.min(Self::MAX_TIMEOUT_SECONDS)),
            memory_limit_mb: self
                .memory_limit_mb
                .filter(|&mb| mb > 0)
                .map(|mb| mb.clamp(Self::MIN_MEMORY_MB, Self::MAX_MEMORY_MB)),
            cpu_quota_us: self.cpu_quota_us.filter(|&q| q > 0),
            cpu_period_us: self.cpu_period_us.filter(|&p| p > 0),
            pids_limit: self.pids_limit.filter(|&n| n > 0),
            max_output_bytes: self.max_output_bytes.filter(|&n| n > 0),
        }
    }

    /// Effective timeout, falling back to [`Self::DEFAULT_TIMEOUT_SECONDS`]
    ///
    /// Never zero and never above [`Self::MAX_TIMEOUT_SECONDS`].
    pub fn timeout(&self) -> u64 {
        self.timeout_seconds
            .filter(|&t| t > 0)
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECONDS)
            .min(Self::MAX_TIMEOUT_SECONDS)
    }

    /// Effective memory ceiling in MB, falling back to [`Self::DEFAULT_MEMORY_MB`]
    ///
    /// Every container gets a ceiling, even when no layer sets one.
    pub fn memory_ceiling(&self) -> u64 {
        self.memory_limit_mb
            .filter(|&mb| mb > 0)
            .unwrap_or(Self::DEFAULT_MEMORY_MB)
            .clamp(Self::MIN_MEMORY_MB, Self::MAX_MEMORY_MB)
    }

    /// Effective output cap, falling back to [`Self::DEFAULT_MAX_OUTPUT_BYTES`]
    pub fn output_cap(&self) -> u64 {
        self.max_output_bytes
            .filter(|&n| n > 0)
            .unwrap_or(Self::DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: Some(Self::DEFAULT_TIMEOUT_SECONDS),
            memory_limit_mb: Some(Self::DEFAULT_MEMORY_MB),
            cpu_quota_us: Some(50_000),
            cpu_period_us: Some(100_000),
            pids_limit: Some(64),
            max_output_bytes: Some(Self::DEFAULT_MAX_OUTPUT_BYTES),
        }
    }
}

/// Security settings applied to every sandbox container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationPolicy {
    /// Run the container with `--network=none`
    #[serde(default = "enabled")]
    pub network_disabled: bool,

    /// Drop every Linux capability
    #[serde(default = "enabled")]
    pub drop_all_capabilities: bool,

    /// Set `no-new-privileges`
    #[serde(default = "enabled")]
    pub no_new_privileges: bool,

    /// Mount the container root filesystem read-only
    #[serde(default = "enabled")]
    pub read_only_rootfs: bool,

    /// Non-root user the command runs as
    #[serde(default = "default_user")]
    pub user: String,

    /// Path the run directory is bind-mounted at (read-only); also the working directory
    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Writable scratch mounts, in docker `--tmpfs` syntax
    #[serde(default = "default_tmpfs")]
    pub tmpfs: Vec<String>,
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self {
            network_disabled: true,
            drop_all_capabilities: true,
            no_new_privileges: true,
            read_only_rootfs: true,
            user: default_user(),
            mount_path: default_mount_path(),
            tmpfs: default_tmpfs(),
        }
    }
}

fn enabled() -> bool {
    true
}

fn default_user() -> String {
    "appuser".to_owned()
}

fn default_mount_path() -> String {
    "/usr/src/app/run_dir".to_owned()
}

fn default_tmpfs() -> Vec<String> {
    vec!["/tmp:rw,nosuid,size=64m".to_owned()]
}

/// Configuration for a bind mount into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the container
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,
}

/// Everything the executor needs for one run
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Runtime image to start
    pub image: String,

    /// Command and arguments run inside the container
    pub command: Vec<String>,

    /// Files materialized in the run directory, keyed by file name
    pub files: BTreeMap<String, String>,

    /// Environment variables for the command
    pub env: BTreeMap<String, String>,

    /// Fully resolved limits for this run
    pub limits: ResourceLimits,
}

/// Why a sandbox run failed at the infrastructure level
///
/// Student code exiting non-zero or writing to stderr is not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxFailure {
    /// No admission permit became available in time
    Busy,
    /// The container exceeded its wall clock budget and was killed
    TimedOut { seconds: u64 },
    /// The container was killed for exceeding its memory ceiling
    MemoryExhausted,
    /// The runtime image is missing or the daemon is unreachable
    Provisioning(String),
    /// The admission pool shut down while waiting
    Interrupted,
    /// Any other container engine or host-side failure
    Infrastructure(String),
}

impl SandboxFailure {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxFailure::TimedOut { .. })
    }
}

impl fmt::Display for SandboxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxFailure::Busy => write!(
                f,
                "execution permit not acquired; server busy, please try again later"
            ),
            SandboxFailure::TimedOut { seconds } => {
                write!(f, "execution timed out after {seconds} seconds")
            }
            SandboxFailure::MemoryExhausted => {
                write!(f, "execution stopped: memory limit exceeded")
            }
            SandboxFailure::Provisioning(msg) => write!(f, "sandbox unavailable: {msg}"),
            SandboxFailure::Interrupted => write!(f, "execution permit wait was interrupted"),
            SandboxFailure::Infrastructure(msg) => write!(f, "sandbox execution failed: {msg}"),
        }
    }
}

/// Raw outcome of one sandbox run
#[derive(Debug, Clone)]
pub struct SandboxExecutionResult {
    /// Collected standard output (capped)
    pub stdout: String,

    /// Collected standard error (capped)
    pub stderr: String,

    /// Container exit code, `-1` if it never produced one
    pub exit_code: i64,

    /// Wall clock time from container start to exit in milliseconds
    pub execution_time_ms: u64,

    /// Set only for infrastructure failures
    pub error: Option<SandboxFailure>,
}

impl SandboxExecutionResult {
    /// A result for a run that failed before producing output
    pub fn failed(failure: SandboxFailure) -> Self {
        Self {
            error: Some(failure),
            ..Default::default()
        }
    }

    /// Check if the run exited with code 0 and no infrastructure failure
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }
}

impl Default for SandboxExecutionResult {
    fn default() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            execution_time_ms: 0,
            error: None,
        }
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn with_overrides_identity(
            timeout in proptest::option::of(0u64..1000),
            memory in proptest::option::of(0u64..65536),
            quota in proptest::option::of(0u64..1_000_000),
            pids in proptest::option::of(0u32..1000),
        ) {
            let base = ResourceLimits {
                timeout_seconds: timeout,
                memory_limit_mb: memory,
                cpu_quota_us: quota,
                cpu_period_us: None,
                pids_limit: pids,
                max_output_bytes: None,
            };
            let result = base.with_overrides(&ResourceLimits::unset());
            prop_assert_eq!(result, base);
        }

        #[test]
        fn with_overrides_full_override(
            base_timeout in proptest::option::of(0u64..1000),
            override_timeout in 0u64..1000,
        ) {
            let base = ResourceLimits {
                timeout_seconds: base_timeout,
                ..Default::default()
            };
            let overrides = ResourceLimits::unset().with_timeout(override_timeout);
            let result = base.with_overrides(&overrides);
            prop_assert_eq!(result.timeout_seconds, Some(override_timeout));
        }
    }
}
