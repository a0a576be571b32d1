use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyStatus {
    pub name: String,
    pub max_concurrent: usize,
    pub active: usize,
    pub waiting: usize,
    pub available: usize,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    waiting: AtomicUsize,
}

/// Counting semaphore with observable active/waiting counters.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    name: Arc<str>,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl ConcurrencyLimiter {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name: Arc::from(name.into()),
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            counters: Arc::default(),
        }
    }

    /// Wait for a slot. The slot is returned when the permit is dropped,
    /// including when the owning task is cancelled.
    pub async fn acquire(&self) -> ConcurrencyPermit {
        let waiting = WaitingSlot::enter(&self.counters);
        // The semaphore is owned by the limiter and never closed.
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("concurrency semaphore is never closed");
        drop(waiting);
        ConcurrencyPermit::new(permit, Arc::clone(&self.counters))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| ConcurrencyPermit::new(permit, Arc::clone(&self.counters)))
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn status(&self) -> ConcurrencyStatus {
        ConcurrencyStatus {
            name: self.name.to_string(),
            max_concurrent: self.max_concurrent,
            active: self.active(),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            available: self.available(),
        }
    }
}

/// Scoped slot in a [`ConcurrencyLimiter`].
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl ConcurrencyPermit {
    fn new(permit: OwnedSemaphorePermit, counters: Arc<Counters>) -> Self {
        counters.active.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            counters,
        }
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct WaitingSlot<'a> {
    counters: &'a Counters,
}

impl<'a> WaitingSlot<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.waiting.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for WaitingSlot<'_> {
    fn drop(&mut self) {
        self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn blocks_at_capacity_and_resumes_on_release() {
        let limiter = ConcurrencyLimiter::new("test", 1);
        let held = limiter.acquire().await;
        assert!(limiter.try_acquire().is_none());

        let contender = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _permit = limiter.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.status().waiting, 1);

        drop(held);
        contender.await.expect("contender finishes");
        assert_eq!(limiter.active(), 0);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn cancelled_holder_returns_its_permit() {
        let limiter = ConcurrencyLimiter::new("test", 2);
        let task = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.active(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(limiter.active(), 0);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn status_reports_capacity() {
        let limiter = ConcurrencyLimiter::new("pvgis", 3);
        let _first = limiter.acquire().await;

        let status = limiter.status();
        assert_eq!(status.max_concurrent, 3);
        assert_eq!(status.active, 1);
        assert_eq!(status.available, 2);
        assert_eq!(status.waiting, 0);
    }
}
