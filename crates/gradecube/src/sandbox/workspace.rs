//! Per-run host directories
//!
//! Each run gets its own directory under the configured temp root. The
//! directory is bind-mounted read-only into the container and removed when
//! the [`RunWorkspace`] is dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::validate_file_name;
use crate::sandbox::SandboxError;

/// Mode of the run directory; the container user is not its owner
const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// A uniquely named run directory
#[derive(Debug)]
pub struct RunWorkspace {
    dir: TempDir,
}

impl RunWorkspace {
    /// Create `<root>/run-<run_id>-XXXXXX`
    #[instrument]
    pub async fn create(root: &Path, run_id: Uuid) -> Result<Self, SandboxError> {
        tokio::fs::create_dir_all(root).await?;

        let prefix = format!("run-{}-", run_id.simple());
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(root)?;
        set_mode(dir.path(), DIR_MODE).await?;

        debug!(path = %dir.path().display(), "run directory created");
        Ok(Self { dir })
    }

    /// Get the host path of the run directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Get the host path to a file inside the run directory
    ///
    /// Returns an error if the name is not a plain file name.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        validate_file_name(name)
            .map_err(|_| SandboxError::InvalidPath(format!("not a plain file name: {name:?}")))?;
        Ok(self.dir.path().join(name))
    }

    /// Write a file into the run directory
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SandboxError> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, content).await?;
        set_mode(&path, FILE_MODE).await?;
        debug!(?path, len = content.len(), "wrote file to run directory");
        Ok(())
    }

    /// Write every file of a request
    pub async fn write_files(&self, files: &BTreeMap<String, String>) -> Result<(), SandboxError> {
        for (name, content) in files {
            self.write_file(name, content.as_bytes()).await?;
        }
        Ok(())
    }

    /// Remove the directory and report failures
    ///
    /// Dropping the workspace also removes it, silently.
    pub fn close(self) -> Result<(), SandboxError> {
        self.dir.close()?;
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), SandboxError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), SandboxError> {
    Ok(())
}
