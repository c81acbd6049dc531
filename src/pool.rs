//! Bounded worker pool for concurrent gossip sessions
//!
//! A thin wrapper over a semaphore: each running session holds one permit,
//! and a caller that cannot get a permit runs the session inline on its own
//! task instead of failing the connection. Dropping the permit returns the
//! slot, so the available count can never exceed capacity or go negative.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A held execution slot. Dropping it releases the slot back to the pool.
pub type WorkerSlot = OwnedSemaphorePermit;

/// Fixed-size pool of concurrent session slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Create a pool with `capacity` slots. A capacity of zero is valid and
    /// forces every session inline.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Grab a free slot, or `None` when the pool is exhausted and the caller
    /// should run inline.
    pub fn try_acquire(&self) -> Option<WorkerSlot> {
        self.permits.clone().try_acquire_owned().ok()
    }

    /// Configured slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.available(), 2);

        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        assert_eq!(pool.available(), 0);

        // Exhausted pool signals inline execution
        assert!(pool.try_acquire().is_none());

        drop(first);
        assert_eq!(pool.available(), 1);
        drop(second);
        assert_eq!(pool.available(), 2);
        assert!(pool.available() <= pool.capacity());
    }

    #[test]
    fn test_zero_capacity_always_inline() {
        let pool = WorkerPool::new(0);
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.capacity(), 0);
    }
}
