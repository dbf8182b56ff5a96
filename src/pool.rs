//! Bounded worker pool for scan and download jobs.
//!
//! At most `max_concurrent` jobs run at once and at most `queue_capacity`
//! more wait for a permit. A caller first [`reserve`](WorkerPool::reserve)s
//! a slot, which fails fast with [`VaultError::Saturated`], then creates
//! its durable row and hands the job to [`Reservation::spawn`]. Dropping an
//! unused reservation returns the slot.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::VaultError;

#[derive(Clone)]
pub struct WorkerPool {
    /// Running jobs.
    permits: Arc<Semaphore>,
    /// Running plus waiting jobs.
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize, queue_capacity: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let capacity = max_concurrent + queue_capacity;
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Claim a running-or-waiting slot without blocking.
    pub fn reserve(&self) -> Result<Reservation, VaultError> {
        let slot = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| VaultError::Saturated)?;
        Ok(Reservation {
            slot,
            permits: self.permits.clone(),
        })
    }

    /// Jobs currently holding a slot (running or waiting).
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A claimed pool slot.
pub struct Reservation {
    slot: OwnedSemaphorePermit,
    permits: Arc<Semaphore>,
}

impl Reservation {
    /// Run `job` once a running permit is free. The slot is held until the
    /// job returns.
    pub fn spawn<F>(self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let _slot = self.slot;
            let Ok(_permit) = self.permits.acquire_owned().await else {
                return;
            };
            job.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_running_plus_queued() {
        let pool = WorkerPool::new(1, 1);
        let a = pool.reserve().unwrap();
        let _b = pool.reserve().unwrap();
        assert!(matches!(pool.reserve(), Err(VaultError::Saturated)));
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert!(pool.reserve().is_ok());
    }

    #[tokio::test]
    async fn slot_released_when_job_finishes() {
        let pool = WorkerPool::new(1, 0);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = pool.reserve().unwrap().spawn(async move {
            let _ = rx.await;
        });
        assert!(matches!(pool.reserve(), Err(VaultError::Saturated)));

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(pool.in_flight(), 0);
    }
}
