//! Container engine operations
//!
//! [`ContainerEngine`] is the seam between the executor and the container
//! runtime. [`DockerEngine`] implements it by driving the `docker` CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::sandbox::SandboxError;
use crate::sandbox::command::{DockerAction, DockerCommand};
use crate::types::{IsolationPolicy, MountConfig, ResourceLimits};

/// Everything needed to create one sandbox container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<MountConfig>,
    pub limits: ResourceLimits,
    pub policy: IsolationPolicy,
}

/// How a container finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerExit {
    pub code: i64,
    pub oom_killed: bool,
}

/// Output collected from a container, each stream capped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether either stream was cut at the cap
    pub truncated: bool,
}

/// Operations the executor and provisioner need from a container runtime
#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    /// Check the daemon is reachable and return its version
    async fn ping(&self) -> Result<String, SandboxError>;

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError>;

    /// Build `image` from the given Dockerfile contents
    async fn build_image(&self, image: &str, dockerfile: &str) -> Result<(), SandboxError>;

    /// Create a container and return its ID
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    async fn start_container(&self, id: &str) -> Result<(), SandboxError>;

    /// Wait for the container to exit
    async fn wait_container(&self, id: &str) -> Result<ContainerExit, SandboxError>;

    async fn kill_container(&self, id: &str) -> Result<(), SandboxError>;

    /// Collect stdout and stderr, keeping at most `max_bytes` of each
    async fn container_logs(&self, id: &str, max_bytes: usize)
    -> Result<ContainerOutput, SandboxError>;

    /// Force-remove the container
    async fn remove_container(&self, id: &str) -> Result<(), SandboxError>;

    /// Start a forced removal without waiting for it, for use from `Drop`
    fn remove_detached(&self, id: &str);
}

/// [`ContainerEngine`] backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker_path: PathBuf,
}

impl DockerEngine {
    pub fn new(docker_path: impl Into<PathBuf>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.docker_binary())
    }

    /// Get the path to the docker binary
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }

    fn command(&self, action: DockerAction) -> DockerCommand {
        DockerCommand::new(&self.docker_path).action(action)
    }

    /// Run a docker command to completion and return its trimmed stdout
    async fn run(&self, args: Vec<String>) -> Result<String, SandboxError> {
        let program = args
            .first()
            .ok_or_else(|| SandboxError::CommandFailed("empty command arguments".to_string()))?;

        debug!(?args, "running docker command");

        let output = Command::new(program)
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(SandboxError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::from_engine_stderr(stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<String, SandboxError> {
        self.run(self.command(DockerAction::Version).build()).await
    }

    #[instrument(skip(self))]
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        let args = self.command(DockerAction::ImageInspect).image(image).build();
        match self.run(args).await {
            Ok(_) => Ok(true),
            Err(SandboxError::ImageNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, dockerfile))]
    async fn build_image(&self, image: &str, dockerfile: &str) -> Result<(), SandboxError> {
        let args = self.command(DockerAction::Build).image(image).build();
        let program = args
            .first()
            .ok_or_else(|| SandboxError::CommandFailed("empty command arguments".to_string()))?;

        debug!(?args, "building image");

        let mut child = Command::new(program)
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::SpawnFailed)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(dockerfile.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(match SandboxError::from_engine_stderr(stderr.trim()) {
                SandboxError::CommandFailed(message) => SandboxError::BuildFailed {
                    image: image.to_string(),
                    message,
                },
                other => other,
            });
        }

        debug!(image, "image built");
        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let args = self
            .command(DockerAction::Create)
            .name(&spec.name)
            .image(&spec.image)
            .limits(spec.limits.clone())
            .policy(spec.policy.clone())
            .envs(spec.env.clone())
            .command(spec.command.iter().cloned());
        let args = spec
            .mounts
            .iter()
            .cloned()
            .fold(args, |cmd, mount| cmd.mount(mount))
            .build();

        let id = self.run(args).await?;
        if id.is_empty() {
            return Err(SandboxError::CommandFailed(
                "docker create returned no container ID".to_string(),
            ));
        }
        debug!(%id, "container created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, id: &str) -> Result<(), SandboxError> {
        self.run(self.command(DockerAction::Start).container(id).build())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn wait_container(&self, id: &str) -> Result<ContainerExit, SandboxError> {
        let code = self
            .run(self.command(DockerAction::Wait).container(id).build())
            .await?;
        let code = code.lines().last().unwrap_or_default().trim();
        let code: i64 = code.parse().map_err(|_| {
            SandboxError::CommandFailed(format!("unexpected exit code from docker wait: {code:?}"))
        })?;

        let oom = self
            .run(self.command(DockerAction::InspectOom).container(id).build())
            .await?;

        Ok(ContainerExit {
            code,
            oom_killed: oom.eq_ignore_ascii_case("true"),
        })
    }

    #[instrument(skip(self))]
    async fn kill_container(&self, id: &str) -> Result<(), SandboxError> {
        self.run(self.command(DockerAction::Kill).container(id).build())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn container_logs(
        &self,
        id: &str,
        max_bytes: usize,
    ) -> Result<ContainerOutput, SandboxError> {
        let args = self.command(DockerAction::Logs).container(id).build();
        let program = args
            .first()
            .ok_or_else(|| SandboxError::CommandFailed("empty command arguments".to_string()))?;

        let mut child = Command::new(program)
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::SpawnFailed)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr) = tokio::join!(
            read_capped(stdout, max_bytes),
            read_capped(stderr, max_bytes)
        );
        let (stdout, stdout_cut) = stdout?;
        let (stderr, stderr_cut) = stderr?;

        let status = child.wait().await?;
        if !status.success() {
            let message = String::from_utf8_lossy(&stderr);
            return Err(SandboxError::from_engine_stderr(message.trim()));
        }

        Ok(ContainerOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: stdout_cut || stderr_cut,
        })
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, id: &str) -> Result<(), SandboxError> {
        self.run(self.command(DockerAction::Remove).container(id).build())
            .await?;
        debug!("container removed");
        Ok(())
    }

    fn remove_detached(&self, id: &str) {
        let args = self.command(DockerAction::Remove).container(id).build();
        let id = id.to_string();

        std::thread::spawn(move || {
            if let Some(program) = args.first() {
                match std::process::Command::new(program)
                    .args(&args[1..])
                    .stdin(Stdio::null())
                    .output()
                {
                    Ok(output) if output.status.success() => {
                        debug!(container = %id, "best-effort removal succeeded");
                    }
                    Ok(output) => {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        warn!(container = %id, stderr = %stderr, "best-effort removal failed");
                    }
                    Err(e) => {
                        warn!(container = %id, error = %e, "best-effort removal spawn failed");
                    }
                }
            }
        });
    }
}

/// Keep the first `max` bytes of a stream and discard the rest
///
/// The stream is always read to the end so the writer never blocks on a
/// full pipe. Returns whether anything was discarded.
async fn read_capped<R>(reader: Option<R>, max: usize) -> Result<(Vec<u8>, bool), SandboxError>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut buf = Vec::new();
    (&mut reader).take(max as u64).read_to_end(&mut buf).await?;
    let discarded = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;

    Ok((buf, discarded > 0))
}
