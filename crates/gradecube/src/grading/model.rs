//! Tasks, submissions and verdicts

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Language;
use crate::types::ResourceLimits;

/// How a task is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    TextInput,
    CodeInput,
    MultipleChoice,
}

/// One input/expected-output pair of a code task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub expected_output: Vec<String>,
    /// Weight of the case in the score
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

/// An exercise as seen by the grader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub language: Option<Language>,
    pub task_type: TaskType,
    /// Reference answer for text and multiple choice tasks
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

impl Task {
    /// Limits set by the task itself, layered over the language limits
    ///
    /// Zero values are ignored and the rest clamped to the supported range.
    pub fn limit_overrides(&self) -> ResourceLimits {
        ResourceLimits {
            timeout_seconds: self.timeout_seconds,
            memory_limit_mb: self.memory_limit_mb,
            ..ResourceLimits::unset()
        }
        .sanitized()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Checking,
    Correct,
    Incorrect,
    PartiallyCorrect,
    Error,
    Timeout,
    ManualReviewRequired,
}

impl SubmissionStatus {
    /// Whether grading has finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending | SubmissionStatus::Checking)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Checking => "CHECKING",
            SubmissionStatus::Correct => "CORRECT",
            SubmissionStatus::Incorrect => "INCORRECT",
            SubmissionStatus::PartiallyCorrect => "PARTIALLY_CORRECT",
            SubmissionStatus::Error => "ERROR",
            SubmissionStatus::Timeout => "TIMEOUT",
            SubmissionStatus::ManualReviewRequired => "MANUAL_REVIEW_REQUIRED",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    pub test_case_id: String,
    pub test_case_name: String,
    pub passed: bool,
    pub actual_output: Option<Vec<String>>,
    pub expected_output: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<u64>,
}

impl TestRunResult {
    /// A failed result for a case that never produced output
    pub fn failed(case: &TestCase, message: impl Into<String>) -> Self {
        Self {
            test_case_id: case.id.clone(),
            test_case_name: case.name.clone(),
            passed: false,
            actual_output: None,
            expected_output: (!case.expected_output.is_empty())
                .then(|| case.expected_output.clone()),
            error_message: Some(message.into()),
            execution_time_ms: None,
        }
    }
}

/// Inbound answer to a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswer {
    pub user_id: String,
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub lesson_id: String,
    pub task_id: String,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub answer_code: Option<String>,
    #[serde(default)]
    pub answer_text: Option<String>,
}

/// Everything grading decided about a submission
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub score: Option<f64>,
    pub feedback: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_error_message: Option<String>,
    pub test_run_results: Vec<TestRunResult>,
}

impl Verdict {
    pub fn new(status: SubmissionStatus, score: f64, feedback: impl Into<String>) -> Self {
        Self {
            status,
            score: Some(score),
            feedback: feedback.into(),
            stdout: None,
            stderr: None,
            compile_error_message: None,
            test_run_results: Vec::new(),
        }
    }

    /// An ERROR verdict with score 0
    pub fn error(feedback: impl Into<String>) -> Self {
        Self::new(SubmissionStatus::Error, 0.0, feedback)
    }

    pub fn with_results(mut self, results: Vec<TestRunResult>) -> Self {
        self.test_run_results = results;
        self
    }

    pub fn with_output(mut self, stdout: Option<String>, stderr: Option<String>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn with_compile_error(mut self, message: impl Into<String>) -> Self {
        self.compile_error_message = Some(message.into());
        self
    }
}

/// One answer by one user to one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub user_id: String,
    pub course_id: String,
    pub lesson_id: String,
    pub task_id: String,
    pub submitted_at: DateTime<Utc>,
    pub checked_at: Option<DateTime<Utc>>,
    pub language: Option<Language>,
    pub answer_code: Option<String>,
    pub answer_text: Option<String>,
    pub status: SubmissionStatus,
    pub score: Option<f64>,
    pub feedback: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_error_message: Option<String>,
    #[serde(default)]
    pub test_run_results: Vec<TestRunResult>,
}

impl Submission {
    /// Create a PENDING submission for `task`
    ///
    /// Code tasks keep only the language and code of the answer, other tasks
    /// only the text.
    pub fn pending(answer: SubmitAnswer, task: &Task) -> Self {
        let (language, answer_code, answer_text) = match task.task_type {
            TaskType::CodeInput => (answer.language.or(task.language), answer.answer_code, None),
            TaskType::TextInput | TaskType::MultipleChoice => (None, None, answer.answer_text),
        };

        Self {
            id: Uuid::new_v4(),
            user_id: answer.user_id,
            course_id: answer.course_id,
            lesson_id: answer.lesson_id,
            task_id: answer.task_id,
            submitted_at: Utc::now(),
            checked_at: None,
            language,
            answer_code,
            answer_text,
            status: SubmissionStatus::Pending,
            score: None,
            feedback: None,
            stdout: None,
            stderr: None,
            compile_error_message: None,
            test_run_results: Vec::new(),
        }
    }

    /// Record a verdict; status and score always change together
    pub fn apply_verdict(&mut self, verdict: Verdict) {
        self.status = verdict.status;
        self.score = verdict.score.map(|score| score.clamp(0.0, 1.0));
        self.feedback = Some(verdict.feedback);
        self.stdout = verdict.stdout;
        self.stderr = verdict.stderr;
        self.compile_error_message = verdict.compile_error_message;
        self.test_run_results = verdict.test_run_results;
        self.checked_at = Some(Utc::now());
    }
}
