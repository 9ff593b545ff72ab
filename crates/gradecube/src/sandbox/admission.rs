//! Admission control for sandbox runs
//!
//! Bounds how many containers run at the same time on this host.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("no sandbox permit became available in time")]
    Busy,

    #[error("admission pool is closed")]
    Closed,
}

/// Counting permit pool shared by every sandbox run
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    /// Create a pool with `capacity` permits
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait up to `wait` for a permit
    #[instrument(skip(self))]
    pub async fn acquire(&self, wait: Duration) -> Result<AdmissionPermit, AdmissionError> {
        let permit = tokio::time::timeout(wait, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| AdmissionError::Busy)?
            .map_err(|_| AdmissionError::Closed)?;

        debug!(available = self.available(), "sandbox permit acquired");
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Get the number of free permits
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the total number of permits
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Close the pool, failing current and future waiters with [`AdmissionError::Closed`]
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// A held sandbox permit, returned to the pool on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}
