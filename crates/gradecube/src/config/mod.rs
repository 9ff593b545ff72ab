use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::language::{
    DEFAULT_TEST_DATA_NAME, Language, LanguageRuntime, validate_file_name,
};
use crate::types::{IsolationPolicy, ResourceLimits};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../gradecube.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("failed to read file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("unsupported language '{0}'")]
    UnknownLanguage(String),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Caps applied to every free-text field before it is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLimits {
    pub stdout_chars: usize,
    pub stderr_chars: usize,
    pub compile_error_chars: usize,
    pub feedback_chars: usize,
    pub test_message_chars: usize,
    /// Lines kept from a reported actual/expected output list
    pub output_lines: usize,
    pub output_line_chars: usize,
    /// Test results accepted from one runner document
    pub max_reported_tests: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            stdout_chars: 2000,
            stderr_chars: 2000,
            compile_error_chars: 1000,
            feedback_chars: 1000,
            test_message_chars: 500,
            output_lines: 100,
            output_line_chars: 500,
            max_reported_tests: 1000,
        }
    }
}

/// Config for gradecube
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the docker binary (uses PATH if not specified).
    #[serde(default)]
    pub docker_path: Option<PathBuf>,

    /// Directory under which per-run directories are created.
    ///
    /// Defaults to `<system temp>/gradecube`.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,

    /// Number of sandbox containers allowed to run at the same time
    #[serde(default = "default_max_concurrent_sandboxes")]
    pub max_concurrent_sandboxes: usize,

    /// Number of gradings processed at the same time
    #[serde(default = "default_grading_workers")]
    pub grading_workers: usize,

    /// Seconds beyond the run timeout a request may wait for a sandbox permit
    #[serde(default = "default_admission_grace_seconds")]
    pub admission_grace_seconds: u64,

    /// Seconds allowed for collecting container output after it exits
    #[serde(default = "default_log_drain_seconds")]
    pub log_drain_seconds: u64,

    /// Security policy applied to every container
    #[serde(default)]
    pub policy: IsolationPolicy,

    /// Default resource limits applied to all runs.
    /// Language limits and then task limits override these.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Caps for persisted free text
    #[serde(default)]
    pub output_limits: OutputLimits,

    /// Language runtimes keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, LanguageRuntime>,
}

impl Config {
    /// Create a new config with the embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            docker_path: None,
            temp_root: None,
            max_concurrent_sandboxes: default_max_concurrent_sandboxes(),
            grading_workers: default_grading_workers(),
            admission_grace_seconds: default_admission_grace_seconds(),
            log_drain_seconds: default_log_drain_seconds(),
            policy: IsolationPolicy::default(),
            default_limits: ResourceLimits::default(),
            output_limits: OutputLimits::default(),
            languages: HashMap::new(),
        }
    }

    /// Get the runtime for a language
    pub fn runtime(&self, language: Language) -> Result<&LanguageRuntime, ConfigError> {
        self.languages
            .get(language.id())
            .ok_or_else(|| ConfigError::LanguageNotFound(language.id().to_owned()))
    }

    /// Languages that have a configured runtime, in a stable order
    pub fn configured_languages(&self) -> Vec<Language> {
        Language::ALL
            .into_iter()
            .filter(|lang| self.languages.contains_key(lang.id()))
            .collect()
    }

    /// Get the path to the docker binary
    pub fn docker_binary(&self) -> PathBuf {
        self.docker_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("docker"))
    }

    /// Directory that holds per-run directories
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("gradecube"))
    }

    /// Merge a language's limits over the defaults
    pub fn language_limits(&self, runtime: &LanguageRuntime) -> ResourceLimits {
        match runtime.limits {
            Some(ref limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }

    pub fn admission_grace(&self) -> Duration {
        Duration::from_secs(self.admission_grace_seconds)
    }

    pub fn log_drain(&self) -> Duration {
        Duration::from_secs(self.log_drain_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_concurrent_sandboxes() -> usize {
    5
}

fn default_grading_workers() -> usize {
    10
}

fn default_admission_grace_seconds() -> u64 {
    5
}

fn default_log_drain_seconds() -> u64 {
    5
}
