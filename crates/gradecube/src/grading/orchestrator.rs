//! Submission state machine
//!
//! Moves one submission from PENDING through CHECKING to a terminal status.
//! Each submission is graded at most once at a time; evaluation runs in its
//! own task so a failure or panic still ends in an ERROR verdict.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::OutputLimits;
use crate::grading::GradingError;
use crate::grading::contract::test_data_json;
use crate::grading::model::{Submission, SubmissionStatus, Task, TaskType, Verdict};
use crate::grading::runtime::RuntimeTable;
use crate::grading::scoring;
use crate::grading::store::{SubmissionStore, TaskCatalog};
use crate::sandbox::Sandbox;
use crate::types::SandboxFailure;

/// Feedback for verdicts produced by an internal failure
pub const INTERNAL_ERROR_FEEDBACK: &str =
    "An internal error occurred while grading this submission.";

/// Result of one [`GradingOrchestrator::grade`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeOutcome {
    /// The submission reached this terminal status
    Graded(SubmissionStatus),
    /// The submission was left untouched
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    /// Another trigger is grading the submission right now
    AlreadyClaimed,
    /// The submission is not PENDING
    NotPending(SubmissionStatus),
}

struct Inner {
    sandbox: Arc<dyn Sandbox>,
    store: Arc<dyn SubmissionStore>,
    catalog: Arc<dyn TaskCatalog>,
    runtimes: Arc<RuntimeTable>,
    output_limits: OutputLimits,
    claims: Mutex<HashSet<Uuid>>,
}

/// Grades submissions by ID
#[derive(Clone)]
pub struct GradingOrchestrator {
    inner: Arc<Inner>,
}

impl GradingOrchestrator {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        store: Arc<dyn SubmissionStore>,
        catalog: Arc<dyn TaskCatalog>,
        runtimes: Arc<RuntimeTable>,
        output_limits: OutputLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sandbox,
                store,
                catalog,
                runtimes,
                output_limits,
                claims: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Grade a PENDING submission
    ///
    /// Missing, claimed or non-PENDING submissions are skipped. When the
    /// verdict cannot be saved an ERROR state is saved in its place; errors are
    /// returned only when that fails too.
    #[instrument(skip(self))]
    pub async fn grade(&self, id: Uuid) -> Result<GradeOutcome, GradingError> {
        let Some(_claim) = Claim::take(&self.inner, id) else {
            warn!("submission is already being graded, skipping");
            return Ok(GradeOutcome::Skipped(SkipReason::AlreadyClaimed));
        };

        let Some(mut submission) = self.inner.store.find_submission_by_id(id).await? else {
            warn!("submission not found, skipping");
            return Ok(GradeOutcome::Skipped(SkipReason::NotFound));
        };
        if submission.status != SubmissionStatus::Pending {
            warn!(status = %submission.status, "submission is not pending, skipping");
            return Ok(GradeOutcome::Skipped(SkipReason::NotPending(submission.status)));
        }

        submission.status = SubmissionStatus::Checking;
        self.inner.store.save_submission(&submission).await?;
        debug!("submission checking");

        let inner = self.inner.clone();
        let snapshot = submission.clone();
        let verdict = match tokio::spawn(async move { inner.evaluate(&snapshot).await }).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                error!(error = %e, "grading failed");
                Verdict::error(INTERNAL_ERROR_FEEDBACK)
            }
            Err(e) => {
                error!(panicked = e.is_panic(), error = %e, "grading task aborted");
                Verdict::error(INTERNAL_ERROR_FEEDBACK)
            }
        };

        let checking = submission.clone();
        submission.apply_verdict(verdict);
        if let Err(e) = self.inner.store.save_submission(&submission).await {
            error!(error = %e, "failed to save verdict, saving error state instead");
            let mut fallback = checking;
            fallback.apply_verdict(Verdict::error(INTERNAL_ERROR_FEEDBACK));
            if let Err(retry) = self.inner.store.save_submission(&fallback).await {
                error!(error = %retry, "failed to save error state, submission left checking");
                return Err(e);
            }
            return Ok(GradeOutcome::Graded(fallback.status));
        }

        info!(
            status = %submission.status,
            score = ?submission.score,
            "submission graded"
        );
        Ok(GradeOutcome::Graded(submission.status))
    }
}

impl Inner {
    async fn evaluate(&self, submission: &Submission) -> Result<Verdict, GradingError> {
        let Some(task) = self.catalog.find_task_by_id(&submission.task_id).await? else {
            warn!(task = %submission.task_id, "task not found");
            return Ok(Verdict::error(
                GradingError::TaskNotFound(submission.task_id.clone()).to_string(),
            ));
        };

        let verdict = match task.task_type {
            TaskType::TextInput => scoring::grade_text(&task, submission.answer_text.as_deref()),
            TaskType::MultipleChoice => {
                scoring::grade_choice(&task, submission.answer_text.as_deref())
            }
            TaskType::CodeInput => self.grade_code(&task, submission).await?,
        };

        let feedback = scoring::truncate(&verdict.feedback, self.output_limits.feedback_chars);
        Ok(Verdict { feedback, ..verdict })
    }

    async fn grade_code(&self, task: &Task, submission: &Submission) -> Result<Verdict, GradingError> {
        let Some(code) = submission
            .answer_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
        else {
            return Ok(Verdict::error("No code was submitted."));
        };

        let Some(language) = task.language.or(submission.language) else {
            return Ok(Verdict::error("This task has no programming language set."));
        };
        let Some(runtime) = self.runtimes.get(language) else {
            warn!(%language, "no runtime configured");
            return Ok(Verdict::error(format!(
                "{} submissions are not supported on this server.",
                language.display_name()
            )));
        };

        let test_data =
            test_data_json(&task.test_cases).map_err(|e| GradingError::Runtime(e.to_string()))?;
        let request = runtime.request(code, test_data, &task.limit_overrides());

        debug!(%language, image = %runtime.image, cases = task.test_cases.len(), "running code");
        let execution = self.sandbox.execute(request).await;

        if let Some(SandboxFailure::Provisioning(ref message)) = execution.error {
            error!(%language, %message, "sandbox provisioning failure");
        }

        Ok(scoring::classify(task, &execution, &self.output_limits))
    }
}

/// Marks a submission as being graded until dropped
struct Claim {
    inner: Arc<Inner>,
    id: Uuid,
}

impl Claim {
    fn take(inner: &Arc<Inner>, id: Uuid) -> Option<Self> {
        let mut claims = inner.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims.insert(id).then(|| Self {
            inner: inner.clone(),
            id,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.inner
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
