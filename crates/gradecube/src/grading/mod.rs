//! Grading pipeline
//!
//! Turns an answer to a task into a scored verdict. Text and multiple choice
//! answers are compared directly; code answers run in the sandbox with the
//! language's runner harness and are scored from its result document.

use thiserror::Error;

pub use crate::grading::contract::{
    ReportedResult, RunnerDocument, parse_runner_output, test_data_json,
};
pub use crate::grading::model::{
    Submission, SubmissionStatus, SubmitAnswer, Task, TaskType, TestCase, TestRunResult, Verdict,
};
pub use crate::grading::orchestrator::{
    GradeOutcome, GradingOrchestrator, INTERNAL_ERROR_FEEDBACK, SkipReason,
};
pub use crate::grading::runtime::{ResolvedRuntime, RuntimeTable};
pub use crate::grading::service::GradingService;
pub use crate::grading::store::{
    InMemorySubmissionStore, InMemoryTaskCatalog, SubmissionStore, TaskCatalog,
};

mod contract;
mod model;
mod orchestrator;
mod runtime;
pub mod scoring;
mod service;
mod store;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("submission {0} not found")]
    SubmissionNotFound(uuid::Uuid),

    #[error("submission store error: {0}")]
    Store(String),

    #[error("failed to prepare run: {0}")]
    Runtime(String),
}
