//! Process-wide pacing of reasoning requests
//!
//! Bounds how many reasoning calls are in flight and spaces out successive
//! request starts so concurrent agents stay under provider rate limits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Slot held for the duration of one reasoning request
#[derive(Debug)]
pub struct RequestSlot {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Concurrency and spacing gate shared by every agent of a run
#[derive(Debug, Clone)]
pub struct RequestQueue {
    semaphore: Arc<Semaphore>,
    next_start: Arc<Mutex<Option<Instant>>>,
    delay: Duration,
}

impl RequestQueue {
    pub fn new(max_concurrent: usize, delay: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_start: Arc::new(Mutex::new(None)),
            delay,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_concurrent, Duration::from_millis(config.delay_ms))
    }

    /// Queue without any pacing, for tests and local models
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, Duration::ZERO)
    }

    /// Wait for a concurrency slot, then for the spacing delay since the previous start
    pub async fn acquire(&self) -> RequestSlot {
        // the semaphore is never closed
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok();

        let wait_until = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(scheduled) if scheduled > now => scheduled,
                _ => now,
            };
            *next = Some(start + self.delay);
            start
        };

        tokio::time::sleep_until(wait_until).await;

        RequestSlot { _permit: permit }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced() {
        let queue = RequestQueue::new(4, Duration::from_secs(4));
        let start = Instant::now();

        let first = queue.acquire().await;
        let second = queue.acquire().await;
        let third = queue.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(8));
        drop((first, second, third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded() {
        let queue = RequestQueue::new(1, Duration::ZERO);
        let slot = queue.acquire().await;
        assert_eq!(queue.available(), 0);

        let queue2 = queue.clone();
        let waiter = tokio::spawn(async move {
            let _slot = queue2.acquire().await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(slot);
        waiter.await.expect("waiter should finish once the slot frees");
        assert_eq!(queue.available(), 1);
    }
}
