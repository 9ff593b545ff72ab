//! A library for grading submitted exercise code.
//!
//! Gradecube runs untrusted code in locked-down Docker containers and turns
//! the output of a per-language runner harness into a scored verdict. It also
//! grades plain text and multiple choice answers.
//!
//! # Features
//!
//! - **Container sandbox** with no network, no capabilities, a read-only root
//!   filesystem, a non-root user and memory, CPU and process caps.
//! - **Admission control** bounding how many containers run at once.
//! - **Runner harnesses** for Python, JavaScript and Java.
//! - **Submission state machine** from PENDING to a terminal status, graded
//!   at most once.
//! - **TOML configuration** for images, commands and limits per language.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language, OutputLimits};
pub use grading::{
    GradeOutcome, GradingError, GradingOrchestrator, GradingService, InMemorySubmissionStore,
    InMemoryTaskCatalog, RuntimeTable, Submission, SubmissionStatus, SubmissionStore,
    SubmitAnswer, Task, TaskCatalog, TaskType, TestCase, TestRunResult,
};
pub use sandbox::{
    AdmissionController, ContainerEngine, DockerEngine, ImageProvisioner, ProvisionOutcome,
    Sandbox, SandboxError, SandboxExecutor,
};
pub use types::{
    IsolationPolicy, ResourceLimits, SandboxExecutionResult, SandboxFailure, SandboxRequest,
};

pub mod config;
pub mod grading;
pub mod sandbox;
pub mod types;
