//! Bounded worker pool
//!
//! Concurrency limits follow one convention across the controller: a pool
//! size of -1 means unbounded.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Builds the semaphore for a pool size; `None` is unbounded.
pub fn semaphore(worker_pool_size: i64) -> Option<Arc<Semaphore>> {
    if worker_pool_size < 0 {
        None
    } else {
        Some(Arc::new(Semaphore::new(worker_pool_size.max(1) as usize)))
    }
}

/// Acquires a permit when the pool is bounded.
pub async fn acquire(semaphore: &Option<Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match semaphore {
        Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
        None => None,
    }
}
