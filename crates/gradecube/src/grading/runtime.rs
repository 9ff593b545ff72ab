//! Per-language launch table
//!
//! Resolves each configured language into everything a run needs: image,
//! Dockerfile, harness files, command and limits. Files referenced by the
//! configuration are read once, when the table is built.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, instrument};

use crate::config::{Config, ConfigError, Language};
use crate::sandbox::{ContainerEngine, ImageProvisioner, ProvisionOutcome, SandboxError};
use crate::types::{ResourceLimits, SandboxRequest};

/// A language runtime with every file loaded
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRuntime {
    pub language: Language,
    pub image: String,
    pub dockerfile: String,
    pub source_name: String,
    pub runner_name: String,
    pub runner_script: String,
    pub test_data_name: String,
    /// Extra files written next to the harness
    pub aux_files: Vec<(String, String)>,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Global and language limits, merged
    pub limits: ResourceLimits,
}

impl ResolvedRuntime {
    /// Build the sandbox request for one submission
    pub fn request(
        &self,
        code: &str,
        test_data: String,
        overrides: &ResourceLimits,
    ) -> SandboxRequest {
        let mut files = BTreeMap::new();
        files.insert(self.source_name.clone(), code.to_string());
        files.insert(self.runner_name.clone(), self.runner_script.clone());
        files.insert(self.test_data_name.clone(), test_data);
        for (name, content) in &self.aux_files {
            files.insert(name.clone(), content.clone());
        }

        SandboxRequest {
            image: self.image.clone(),
            command: self.command.clone(),
            files,
            env: self.env.clone(),
            limits: self.limits.with_overrides(overrides),
        }
    }
}

/// Runtimes keyed by language
#[derive(Debug, Clone, Default)]
pub struct RuntimeTable {
    entries: BTreeMap<Language, ResolvedRuntime>,
}

impl RuntimeTable {
    /// Resolve every configured language
    #[instrument(skip(config))]
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();

        for language in config.configured_languages() {
            let runtime = config.runtime(language)?;

            let runner_script = match runtime.runner_script {
                Some(ref path) => read_file(path)?,
                None => language.builtin_runner().to_string(),
            };
            let dockerfile = match runtime.dockerfile {
                Some(ref path) => read_file(path)?,
                None => language.builtin_dockerfile().to_string(),
            };
            let aux_files = language
                .builtin_aux_files()
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_string()))
                .collect();

            debug!(%language, image = %runtime.image, "resolved runtime");

            entries.insert(
                language,
                ResolvedRuntime {
                    language,
                    image: runtime.image.clone(),
                    dockerfile,
                    source_name: runtime.source_name.clone(),
                    runner_name: runtime.runner_name.clone(),
                    runner_script,
                    test_data_name: runtime.test_data_name.clone(),
                    aux_files,
                    command: runtime.expand_command(),
                    env: runtime.env.clone(),
                    limits: config.language_limits(runtime),
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn get(&self, language: Language) -> Option<&ResolvedRuntime> {
        self.entries.get(&language)
    }

    /// Languages in the table, in a stable order
    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.entries.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Provision the image of every language, stopping at the first failure
    pub async fn provision_all<E: ContainerEngine>(
        &self,
        provisioner: &ImageProvisioner<E>,
    ) -> Result<Vec<(Language, ProvisionOutcome)>, SandboxError> {
        let mut outcomes = Vec::with_capacity(self.entries.len());
        for (language, runtime) in &self.entries {
            let outcome = provisioner.ensure(&runtime.image, &runtime.dockerfile).await?;
            outcomes.push((*language, outcome));
        }
        Ok(outcomes)
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}
