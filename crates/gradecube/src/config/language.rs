use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

/// Characters that may not appear in a file name placed in the run directory
const INVALID_FILE_NAME_CHARS: [char; 2] = ['/', '\\'];

/// Supported exercise languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
}

impl Language {
    /// Every supported language
    pub const ALL: [Language; 3] = [Language::Python, Language::JavaScript, Language::Java];

    /// Identifier used as the key in `[languages.<id>]`
    pub fn id(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::Java => "Java",
        }
    }

    /// Runner harness shipped with the crate
    pub fn builtin_runner(&self) -> &'static str {
        match self {
            Language::Python => include_str!("../../runners/python_runner.py"),
            Language::JavaScript => include_str!("../../runners/javascript_runner.js"),
            Language::Java => include_str!("../../runners/TestRunner.java"),
        }
    }

    /// Dockerfile used to provision the runtime image when none is configured
    pub fn builtin_dockerfile(&self) -> &'static str {
        match self {
            Language::Python => include_str!("../../docker/python-runner.Dockerfile"),
            Language::JavaScript => include_str!("../../docker/javascript-runner.Dockerfile"),
            Language::Java => include_str!("../../docker/java-runner.Dockerfile"),
        }
    }

    /// Extra files the runner needs next to the student code
    pub fn builtin_aux_files(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Language::Java => &[("MiniJson.java", include_str!("../../runners/MiniJson.java"))],
            Language::Python | Language::JavaScript => &[],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    /// Accepts the identifier or the display name, ignoring case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Language::ALL
            .into_iter()
            .find(|lang| {
                lang.id().eq_ignore_ascii_case(wanted)
                    || lang.display_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| ConfigError::UnknownLanguage(s.to_owned()))
    }
}

/// Configuration for one language runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageRuntime {
    /// Human-readable name (e.g., "Python 3.12")
    pub name: String,

    /// Runtime image tag
    pub image: String,

    /// Dockerfile to build the image from (builtin Dockerfile if unset)
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    /// File name the student code is written to
    pub source_name: String,

    /// File name the runner harness is written to
    pub runner_name: String,

    /// Runner harness to use instead of the builtin one
    #[serde(default)]
    pub runner_script: Option<PathBuf>,

    /// File name the test data is written to
    #[serde(default = "default_test_data_name")]
    pub test_data_name: String,

    /// Launch command with placeholders
    /// Placeholders: {runner}, {source}, {test_data}
    pub command: Vec<String>,

    /// Environment variables for the command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Resource limits for this language (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl LanguageRuntime {
    /// Expand placeholders in the launch command
    pub fn expand_command(&self) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{runner}", &self.runner_name)
                    .replace("{source}", &self.source_name)
                    .replace("{test_data}", &self.test_data_name)
            })
            .collect()
    }

    /// File names this runtime writes into the run directory
    pub fn file_names(&self) -> [&str; 3] {
        [&self.source_name, &self.runner_name, &self.test_data_name]
    }
}

/// Default name of the test data file
pub const DEFAULT_TEST_DATA_NAME: &str = "test_data.json";

fn default_test_data_name() -> String {
    DEFAULT_TEST_DATA_NAME.to_owned()
}

/// Check that a name is a plain file name usable inside the run directory
pub fn validate_file_name(name: &str) -> Result<(), ConfigError> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.chars().any(|c| INVALID_FILE_NAME_CHARS.contains(&c));
    if invalid {
        return Err(ConfigError::InvalidFileName(name.to_owned()));
    }
    Ok(())
}
