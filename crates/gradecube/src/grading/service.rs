//! Inbound grading service
//!
//! Accepts answers, stores them as PENDING and grades them in the background
//! on a bounded worker pool. Dropping the service detaches in-flight gradings
//! instead of aborting them; [`GradingService::wait_idle`] waits for them.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::grading::GradingError;
use crate::grading::model::{Submission, SubmitAnswer};
use crate::grading::orchestrator::{GradeOutcome, GradingOrchestrator};
use crate::grading::store::{SubmissionStore, TaskCatalog};

pub struct GradingService {
    orchestrator: GradingOrchestrator,
    store: Arc<dyn SubmissionStore>,
    catalog: Arc<dyn TaskCatalog>,
    workers: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
}

impl GradingService {
    /// Create a service running at most `workers` gradings at once
    pub fn new(
        orchestrator: GradingOrchestrator,
        store: Arc<dyn SubmissionStore>,
        catalog: Arc<dyn TaskCatalog>,
        workers: usize,
    ) -> Self {
        Self {
            orchestrator,
            store,
            catalog,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn orchestrator(&self) -> &GradingOrchestrator {
        &self.orchestrator
    }

    /// Store a PENDING submission and schedule its grading
    ///
    /// Returns as soon as the submission is saved.
    #[instrument(skip(self, answer), fields(task = %answer.task_id, user = %answer.user_id))]
    pub async fn submit_answer(&self, answer: SubmitAnswer) -> Result<Submission, GradingError> {
        let task = self
            .catalog
            .find_task_by_id(&answer.task_id)
            .await?
            .ok_or_else(|| GradingError::TaskNotFound(answer.task_id.clone()))?;

        let submission = Submission::pending(answer, &task);
        self.store.save_submission(&submission).await?;
        info!(submission = %submission.id, "submission accepted");

        self.schedule(submission.id).await;
        Ok(submission)
    }

    /// Look up the current state of a submission
    pub async fn submission(&self, id: Uuid) -> Result<Submission, GradingError> {
        self.store
            .find_submission_by_id(id)
            .await?
            .ok_or(GradingError::SubmissionNotFound(id))
    }

    /// Grade an existing submission in the background
    pub async fn schedule(&self, id: Uuid) {
        let orchestrator = self.orchestrator.clone();
        let workers = self.workers.clone();

        let mut in_flight = self.in_flight.lock().await;
        // Reap finished gradings
        while in_flight.try_join_next().is_some() {}

        in_flight.spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                warn!(submission = %id, "worker pool closed, grading dropped");
                return;
            };
            match orchestrator.grade(id).await {
                Ok(GradeOutcome::Graded(status)) => {
                    debug!(submission = %id, %status, "grading finished");
                }
                Ok(GradeOutcome::Skipped(reason)) => {
                    debug!(submission = %id, ?reason, "grading skipped");
                }
                Err(e) => error!(submission = %id, error = %e, "grading failed"),
            }
        });
    }

    /// Wait until every scheduled grading has finished
    pub async fn wait_idle(&self) {
        loop {
            let mut running = std::mem::take(&mut *self.in_flight.lock().await);
            if running.is_empty() {
                return;
            }
            while let Some(joined) = running.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "grading task failed to complete");
                }
            }
        }
    }

    /// Number of gradings that may run at the same time
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }
}

impl Drop for GradingService {
    /// Scheduled gradings keep running on the runtime after the service is gone
    fn drop(&mut self) {
        let in_flight = self.in_flight.get_mut();
        if !in_flight.is_empty() {
            debug!(count = in_flight.len(), "detaching in-flight gradings");
            in_flight.detach_all();
        }
    }
}
