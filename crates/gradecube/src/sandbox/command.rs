//! Command builder for the Docker CLI
//!
//! Builds command-line arguments for the container engine subcommands the
//! executor and provisioner rely on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{IsolationPolicy, MountConfig, ResourceLimits};

/// Builder for Docker command-line arguments
#[derive(Debug)]
pub struct DockerCommand {
    /// Path to the docker binary
    docker_path: PathBuf,
    action: DockerAction,
    /// Image tag for `image inspect`, `build` and `create`
    image: Option<String>,
    /// Container name or ID for container-scoped actions
    container: Option<String>,
    /// --name (create only)
    name: Option<String>,
    limits: ResourceLimits,
    policy: IsolationPolicy,
    mounts: Vec<MountConfig>,
    /// --env
    env: BTreeMap<String, String>,
    command: Vec<String>,
}

impl DockerCommand {
    /// Create a new docker command builder
    pub fn new(docker_path: impl Into<PathBuf>) -> Self {
        Self {
            docker_path: docker_path.into(),
            action: DockerAction::Version,
            image: None,
            container: None,
            name: None,
            limits: ResourceLimits::default(),
            policy: IsolationPolicy::default(),
            mounts: Vec::new(),
            env: BTreeMap::new(),
            command: Vec::new(),
        }
    }

    /// Set the action to perform
    pub fn action(mut self, action: DockerAction) -> Self {
        self.action = action;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Set the container name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the isolation policy
    pub fn policy(mut self, policy: IsolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add a bind mount
    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Set the command run inside the container
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.docker_path.to_string_lossy().into_owned()];
        let image = self.image.unwrap_or_default();
        let container = self.container.unwrap_or_default();

        match self.action {
            DockerAction::Version => {
                args.extend(["version", "--format", "{{.Server.Version}}"].map(String::from));
            }
            DockerAction::ImageInspect => {
                args.extend(["image", "inspect", "--format", "{{.Id}}"].map(String::from));
                args.push(image);
            }
            DockerAction::Build => {
                // Dockerfile is read from stdin without a build context
                args.extend(["build", "--quiet", "--tag"].map(String::from));
                args.push(image);
                args.push("-".to_string());
            }
            DockerAction::Create => {
                args.push("create".to_string());
                args.push("--pull=never".to_string());
                if let Some(name) = self.name {
                    args.push(format!("--name={name}"));
                }

                // Isolation policy
                if self.policy.network_disabled {
                    args.push("--network=none".to_string());
                }
                if self.policy.drop_all_capabilities {
                    args.push("--cap-drop=ALL".to_string());
                }
                if self.policy.no_new_privileges {
                    args.push("--security-opt=no-new-privileges".to_string());
                }
                if self.policy.read_only_rootfs {
                    args.push("--read-only".to_string());
                }
                for tmpfs in &self.policy.tmpfs {
                    args.push(format!("--tmpfs={tmpfs}"));
                }
                args.push(format!("--user={}", self.policy.user));
                args.push(format!("--workdir={}", self.policy.mount_path));

                // Resource limits; the memory ceiling is always set
                let limits = self.limits.sanitized();
                let memory = limits.memory_ceiling();
                args.push(format!("--memory={memory}m"));
                args.push(format!("--memory-swap={memory}m"));
                if let Some(period) = limits.cpu_period_us {
                    args.push(format!("--cpu-period={period}"));
                }
                if let Some(quota) = limits.cpu_quota_us {
                    args.push(format!("--cpu-quota={quota}"));
                }
                if let Some(pids) = limits.pids_limit {
                    args.push(format!("--pids-limit={pids}"));
                }

                // The daemon log holds both streams plus per-line framing
                args.push("--log-driver=json-file".to_string());
                args.push(format!("--log-opt=max-size={}k", log_size_kb(limits.output_cap())));
                args.push("--log-opt=max-file=1".to_string());

                // Mounts
                for mount in &self.mounts {
                    let mut spec = format!(
                        "--mount=type=bind,source={},target={}",
                        mount.source, mount.target
                    );
                    if !mount.writable {
                        spec.push_str(",readonly");
                    }
                    args.push(spec);
                }

                // Environment
                for (key, value) in &self.env {
                    args.push(format!("--env={key}={value}"));
                }

                args.push(image);
                args.extend(self.command);
            }
            DockerAction::Start => {
                args.push("start".to_string());
                args.push(container);
            }
            DockerAction::Wait => {
                args.push("wait".to_string());
                args.push(container);
            }
            DockerAction::Kill => {
                args.push("kill".to_string());
                args.push(container);
            }
            DockerAction::Logs => {
                args.push("logs".to_string());
                args.push(container);
            }
            DockerAction::InspectOom => {
                args.extend(["inspect", "--format", "{{.State.OOMKilled}}"].map(String::from));
                args.push(container);
            }
            DockerAction::Remove => {
                args.extend(["rm", "--force", "--volumes"].map(String::from));
                args.push(container);
            }
        }

        args
    }

    /// Get the docker binary path
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerAction {
    /// Ask the daemon for its version
    Version,
    /// Check whether an image exists locally
    ImageInspect,
    /// Build an image from a Dockerfile on stdin
    Build,
    /// Create a container without starting it
    Create,
    Start,
    /// Block until the container exits and print its exit code
    Wait,
    Kill,
    /// Print the container's stdout and stderr
    Logs,
    /// Print whether the container was killed by the OOM killer
    InspectOom,
    /// Force-remove a container
    Remove,
}

/// Size of the daemon's log file for a run capped at `output_cap` bytes per stream
fn log_size_kb(output_cap: u64) -> u64 {
    (output_cap.saturating_mul(4) / 1024).max(1024)
}
