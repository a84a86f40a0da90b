//! Bounded admission in front of the sandbox launcher.
//!
//! Every execution holds one permit from validation until cleanup has
//! finished, so the number of live execution units never exceeds
//! `max_concurrent`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::LimitsConfig;
use crate::errors::ExecutionError;

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    queue_timeout: Duration,
}

impl AdmissionGate {
    pub fn new(max_concurrent: usize, queue_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queue_timeout,
        }
    }

    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self::new(
            limits.max_concurrent,
            Duration::from_millis(limits.queue_timeout_ms),
        )
    }

    /// Take a slot, waiting at most the queue timeout for one to free up.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ExecutionError> {
        let overloaded = || ExecutionError::Overloaded {
            max_concurrent: self.max_concurrent,
        };

        if self.queue_timeout.is_zero() {
            return self.semaphore.clone().try_acquire_owned().map_err(|_| overloaded());
        }

        match tokio::time::timeout(self.queue_timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(overloaded()),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
