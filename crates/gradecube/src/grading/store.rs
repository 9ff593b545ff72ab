//! Persistence seams for submissions and tasks
//!
//! Grading only needs lookup and save. The in-memory implementations back the
//! CLI and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::grading::GradingError;
use crate::grading::model::{Submission, SubmissionStatus, Task};

#[async_trait]
pub trait SubmissionStore: Send + Sync + 'static {
    async fn find_submission_by_id(&self, id: Uuid) -> Result<Option<Submission>, GradingError>;

    /// Insert or replace a submission
    async fn save_submission(&self, submission: &Submission) -> Result<(), GradingError>;
}

#[async_trait]
pub trait TaskCatalog: Send + Sync + 'static {
    async fn find_task_by_id(&self, id: &str) -> Result<Option<Task>, GradingError>;
}

#[derive(Debug)]
struct StoredSubmission {
    current: Submission,
    /// Every status the submission was saved with, oldest first
    history: Vec<SubmissionStatus>,
}

/// Submission store held in memory
#[derive(Debug, Default)]
pub struct InMemorySubmissionStore {
    submissions: RwLock<HashMap<Uuid, StoredSubmission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses a submission was saved with, oldest first
    ///
    /// Consecutive saves with the same status are recorded once.
    pub async fn status_history(&self, id: Uuid) -> Vec<SubmissionStatus> {
        self.submissions
            .read()
            .await
            .get(&id)
            .map(|stored| stored.history.clone())
            .unwrap_or_default()
    }

    /// Every stored submission
    pub async fn all(&self) -> Vec<Submission> {
        self.submissions
            .read()
            .await
            .values()
            .map(|stored| stored.current.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.submissions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.submissions.read().await.is_empty()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn find_submission_by_id(&self, id: Uuid) -> Result<Option<Submission>, GradingError> {
        Ok(self
            .submissions
            .read()
            .await
            .get(&id)
            .map(|stored| stored.current.clone()))
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), GradingError> {
        let mut submissions = self.submissions.write().await;
        match submissions.get_mut(&submission.id) {
            Some(stored) => {
                if stored.history.last() != Some(&submission.status) {
                    stored.history.push(submission.status);
                }
                stored.current = submission.clone();
            }
            None => {
                submissions.insert(
                    submission.id,
                    StoredSubmission {
                        current: submission.clone(),
                        history: vec![submission.status],
                    },
                );
            }
        }
        Ok(())
    }
}

/// Task catalog held in memory
#[derive(Debug, Default)]
pub struct InMemoryTaskCatalog {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding `tasks`
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks.into_iter().map(|task| (task.id.clone(), task)).collect()),
        }
    }

    pub async fn insert(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }
}

#[async_trait]
impl TaskCatalog for InMemoryTaskCatalog {
    async fn find_task_by_id(&self, id: &str) -> Result<Option<Task>, GradingError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }
}
