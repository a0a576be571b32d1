use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub max_calls: usize,
    pub window: Duration,
}

impl RateLimiterConfig {
    pub const fn per_minute(max_calls: usize) -> Self {
        Self {
            max_calls,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterStatus {
    pub name: String,
    pub max_calls: usize,
    pub window_seconds: u64,
    pub current_calls: usize,
    pub remaining: usize,
    pub waiting: usize,
}

/// Sliding-window rate limiter.
///
/// Keeps the instants of granted calls inside the trailing window and prunes
/// stale ones before each admission check. The lock is never held across an
/// await, so a cancelled waiter cannot strand a slot.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    granted: Mutex<VecDeque<Instant>>,
    waiting: AtomicUsize,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            name: name.into(),
            config: RateLimiterConfig {
                max_calls: config.max_calls.max(1),
                ..config
            },
            granted: Mutex::new(VecDeque::new()),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the window has room, then record the call.
    pub async fn acquire(&self) {
        let mut waiter: Option<WaitingGuard<'_>> = None;
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    if waiter.is_none() {
                        waiter = Some(WaitingGuard::enter(&self.waiting));
                    }
                    debug!(
                        limiter = %self.name,
                        wait_ms = wait.as_millis() as u64,
                        "rate limit reached; waiting for window"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Record the call if the window has room, otherwise return how long
    /// until the oldest call leaves the window.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut granted = self.granted.lock().expect("rate limiter lock is not poisoned");
        prune(&mut granted, now, self.config.window);

        if granted.len() < self.config.max_calls {
            granted.push_back(now);
            return Ok(());
        }

        let wait = granted
            .front()
            .map_or(self.config.window, |oldest| {
                (*oldest + self.config.window).saturating_duration_since(now)
            });
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Calls still admissible in the current window.
    pub fn remaining(&self) -> usize {
        let mut granted = self.granted.lock().expect("rate limiter lock is not poisoned");
        prune(&mut granted, Instant::now(), self.config.window);
        self.config.max_calls.saturating_sub(granted.len())
    }

    pub fn status(&self) -> RateLimiterStatus {
        let mut granted = self.granted.lock().expect("rate limiter lock is not poisoned");
        prune(&mut granted, Instant::now(), self.config.window);
        let current_calls = granted.len();

        RateLimiterStatus {
            name: self.name.clone(),
            max_calls: self.config.max_calls,
            window_seconds: self.config.window.as_secs(),
            current_calls,
            remaining: self.config.max_calls.saturating_sub(current_calls),
            waiting: self.waiting.load(Ordering::SeqCst),
        }
    }
}

fn prune(granted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while granted
        .front()
        .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= window)
    {
        granted.pop_front();
    }
}

struct WaitingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn limiter(max_calls: usize, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            RateLimiterConfig {
                max_calls,
                window: Duration::from_secs(window_secs),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_exactly_the_call_over_quota() {
        let limiter = limiter(3, 60);

        let outcomes = (0..4).map(|_| limiter.try_acquire()).collect::<Vec<_>>();
        assert!(outcomes[..3].iter().all(Result::is_ok));
        let wait = outcomes[3].expect_err("fourth call rejected");
        assert!(wait <= Duration::from_secs(60));
        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_again_once_the_window_slides() {
        let limiter = limiter(2, 10);
        limiter.try_acquire().expect("first");
        limiter.try_acquire().expect("second");
        assert!(limiter.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_waits_for_the_oldest_call() {
        let limiter = Arc::new(limiter(1, 5));
        limiter.acquire().await;

        let started = Instant::now();
        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.status().waiting, 1);

        waiter.await.expect("waiter joins");
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(limiter.status().waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_window_usage() {
        let limiter = limiter(10, 60);
        limiter.try_acquire().expect("first");

        let status = limiter.status();
        assert_eq!(status.current_calls, 1);
        assert_eq!(status.remaining, 9);
        assert_eq!(status.window_seconds, 60);
    }
}
