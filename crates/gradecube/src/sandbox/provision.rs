//! Runtime image provisioning
//!
//! Makes sure each language image exists locally before it is used, building
//! it from its Dockerfile the first time.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::sandbox::SandboxError;
use crate::sandbox::engine::ContainerEngine;

/// What [`ImageProvisioner::ensure`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The image was already present on the host
    AlreadyPresent,
    /// The image was built from its Dockerfile
    Built,
    /// The image was provisioned earlier by this provisioner
    Cached,
}

/// Idempotent image builder
///
/// Provisioning is serialized, so concurrent callers for the same image
/// cause at most one build.
#[derive(Debug)]
pub struct ImageProvisioner<E: ContainerEngine> {
    engine: Arc<E>,
    ready: Mutex<HashSet<String>>,
}

impl<E: ContainerEngine> ImageProvisioner<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            ready: Mutex::new(HashSet::new()),
        }
    }

    /// Check that the container daemon answers
    pub async fn check_daemon(&self) -> Result<String, SandboxError> {
        let version = self.engine.ping().await?;
        debug!(%version, "container daemon reachable");
        Ok(version)
    }

    /// Ensure `image` exists, building it from `dockerfile` if needed
    #[instrument(skip(self, dockerfile))]
    pub async fn ensure(
        &self,
        image: &str,
        dockerfile: &str,
    ) -> Result<ProvisionOutcome, SandboxError> {
        let mut ready = self.ready.lock().await;
        if ready.contains(image) {
            return Ok(ProvisionOutcome::Cached);
        }

        let outcome = if self.engine.image_exists(image).await? {
            debug!(image, "image already present");
            ProvisionOutcome::AlreadyPresent
        } else {
            info!(image, "building runtime image");
            self.engine.build_image(image, dockerfile).await?;
            info!(image, "runtime image built");
            ProvisionOutcome::Built
        };

        ready.insert(image.to_string());
        Ok(outcome)
    }

    /// Whether `image` has been provisioned by this provisioner
    pub async fn is_ready(&self, image: &str) -> bool {
        self.ready.lock().await.contains(image)
    }
}
