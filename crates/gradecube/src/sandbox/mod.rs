//! Container sandbox
//!
//! This module runs untrusted code in short-lived Docker containers. It covers
//! command building, the container engine seam, admission control, per-run
//! workspaces, image provisioning, and the executor that ties them together.
//!
//! References for the Docker CLI arguments used here:
//! - https://docs.docker.com/reference/cli/docker/container/create/
//! - https://docs.docker.com/engine/containers/resource_constraints/

use async_trait::async_trait;
use thiserror::Error;

pub use crate::sandbox::admission::{AdmissionController, AdmissionError, AdmissionPermit};
pub use crate::sandbox::command::{DockerAction, DockerCommand};
pub use crate::sandbox::engine::{
    ContainerEngine, ContainerExit, ContainerOutput, ContainerSpec, DockerEngine,
};
pub use crate::sandbox::executor::SandboxExecutor;
pub use crate::sandbox::provision::{ImageProvisioner, ProvisionOutcome};
pub use crate::sandbox::workspace::RunWorkspace;
use crate::types::{SandboxExecutionResult, SandboxFailure, SandboxRequest};

mod admission;
mod command;
mod engine;
mod executor;
mod provision;
mod workspace;

/// Errors that occur while driving the container engine or the run directory
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn docker process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("docker command failed: {0}")]
    CommandFailed(String),

    #[error("runtime image not found: {0}")]
    ImageNotFound(String),

    #[error("docker daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("failed to build image {image}: {message}")]
    BuildFailed { image: String, message: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Classify a failed engine command by its stderr
    pub fn from_engine_stderr(stderr: &str) -> Self {
        let lower = stderr.to_ascii_lowercase();
        if lower.contains("no such image")
            || lower.contains("unable to find image")
            || lower.contains("pull access denied")
        {
            SandboxError::ImageNotFound(stderr.to_string())
        } else if lower.contains("cannot connect to the docker daemon")
            || lower.contains("is the docker daemon running")
            || lower.contains("permission denied while trying to connect")
        {
            SandboxError::DaemonUnavailable(stderr.to_string())
        } else {
            SandboxError::CommandFailed(stderr.to_string())
        }
    }

    /// Whether the failure means the sandbox cannot run at all on this host
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            SandboxError::SpawnFailed(_)
                | SandboxError::ImageNotFound(_)
                | SandboxError::DaemonUnavailable(_)
                | SandboxError::BuildFailed { .. }
        )
    }

    /// Convert into the failure reported on a [`SandboxExecutionResult`]
    pub fn into_failure(self) -> SandboxFailure {
        if self.is_provisioning() {
            SandboxFailure::Provisioning(self.to_string())
        } else {
            SandboxFailure::Infrastructure(self.to_string())
        }
    }
}

/// Runs one request in isolation
///
/// Implementations never fail: infrastructure problems are reported through
/// [`SandboxExecutionResult::error`].
#[async_trait]
pub trait Sandbox: Send + Sync + 'static {
    async fn execute(&self, request: SandboxRequest) -> SandboxExecutionResult;
}
