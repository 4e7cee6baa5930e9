//! Counting semaphore bounding concurrent outstanding operations.
//!
//! One [`Throttle`] caps registry calls, archive fill-in workers and queue
//! items alike. Cloning shares the same permit pool.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{PackError, Result};

/// Fixed-capacity permit pool.
#[derive(Debug, Clone)]
pub struct Throttle {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

/// A held permit. Released by [`ThrottlePermit::done`] or on drop.
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

impl Throttle {
    /// Create a throttle with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait until a permit is free and take it.
    pub async fn take(&self) -> Result<ThrottlePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| PackError::QueueError(format!("Throttle closed: {}", e)))?;
        Ok(ThrottlePermit { _permit: permit })
    }

    /// Total permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently taken.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl ThrottlePermit {
    /// Release the permit.
    pub fn done(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_is_clamped() {
        let throttle = Throttle::new(0);
        assert_eq!(throttle.capacity(), 1);
        assert_eq!(throttle.available(), 1);
    }

    #[tokio::test]
    async fn test_take_and_done() {
        let throttle = Throttle::new(2);
        let first = throttle.take().await.unwrap();
        let second = throttle.take().await.unwrap();
        assert_eq!(throttle.available(), 0);

        first.done();
        assert_eq!(throttle.available(), 1);
        drop(second);
        assert_eq!(throttle.available(), 2);
    }

    #[tokio::test]
    async fn test_take_waits_for_release() {
        let throttle = Throttle::new(1);
        let held = throttle.take().await.unwrap();

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.take().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        held.done();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounds_concurrent_work() {
        let throttle = Throttle::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let throttle = throttle.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let completed = Arc::clone(&completed);
            handles.push(tokio::spawn(async move {
                let permit = throttle.take().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(15)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
                permit.done();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(completed.load(Ordering::SeqCst), 10);
        assert_eq!(throttle.available(), 3);
    }
}
