//! Worker capacity shared by every investigation in the process.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore bounding how many adapter invocations run at once
/// across all investigations. It is the only state investigations share.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Waits for a free slot. `None` only if the pool was closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.sem).acquire_owned().await.ok()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(16)
    }
}
