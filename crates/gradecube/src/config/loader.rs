//! Configuration file loading for gradecube
//!
//! Handles loading and parsing configuration files using the config crate.

use std::collections::HashSet;
use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, Language, validate_file_name};

/// Prefix of environment variables that override file settings
const ENV_PREFIX: &str = "GRADECUBE";

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply `GRADECUBE_*` variables
    ///
    /// Nested keys use `__`, e.g. `GRADECUBE_DEFAULT_LIMITS__TIMEOUT_SECONDS=15`.
    /// Without a file the embedded example configuration is the base.
    pub fn from_file_with_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => ConfigBuilder::builder().add_source(File::from(path)),
            None => ConfigBuilder::builder()
                .add_source(File::from_str(super::EXAMPLE_CONFIG, FileFormat::Toml)),
        };
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_sandboxes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_sandboxes must be at least 1".to_owned(),
            ));
        }
        if self.grading_workers == 0 {
            return Err(ConfigError::Invalid(
                "grading_workers must be at least 1".to_owned(),
            ));
        }

        let user = self.policy.user.trim();
        if user.is_empty() || user == "root" || user == "0" || user.starts_with("0:") {
            return Err(ConfigError::Invalid(format!(
                "sandbox user must be a non-root user, got '{user}'"
            )));
        }
        if !self.policy.mount_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "policy mount_path must be absolute, got '{}'",
                self.policy.mount_path
            )));
        }

        for (id, runtime) in &self.languages {
            let language: Language = id.parse()?;
            if language.id() != id {
                return Err(ConfigError::Invalid(format!(
                    "language key '{id}' should be written as '{}'",
                    language.id()
                )));
            }
            if runtime.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if runtime.image.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty image"
                )));
            }
            if runtime.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty command"
                )));
            }

            let mut seen = HashSet::new();
            let aux = language.builtin_aux_files().iter().map(|(name, _)| *name);
            for name in runtime.file_names().into_iter().chain(aux) {
                validate_file_name(name)?;
                if !seen.insert(name) {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' uses file name '{name}' more than once"
                    )));
                }
            }
        }

        Ok(())
    }
}
