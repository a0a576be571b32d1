use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::CircuitOpenError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub recovery_timeout: Duration,
    /// Successful probes needed to close the circuit again.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Copernicus CAMS: slow upstream, tolerate more failures, probe twice.
    pub const fn cams() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }

    pub const fn pvgis() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Cumulative counters, never reset by state transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub state_changes: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_state_change: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
}

impl CircuitMetrics {
    /// Share of completed calls that succeeded; 1.0 before any call completes.
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_requests + self.failed_requests;
        if completed == 0 {
            return 1.0;
        }
        self.successful_requests as f64 / completed as f64
    }
}

/// Point-in-time view of one breaker for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_successes: u32,
    pub half_open_max_calls: u32,
    pub retry_after_secs: Option<u64>,
    pub success_rate: f64,
    pub metrics: CircuitMetrics,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_successes: u32,
    metrics: CircuitMetrics,
}

impl CircuitInner {
    fn transition(&mut self, name: &str, next: CircuitState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        self.metrics.state_changes += 1;
        self.metrics.last_state_change = Some(OffsetDateTime::now_utc());

        match next {
            CircuitState::Open => warn!(
                breaker = name,
                from = previous.as_str(),
                failures = self.consecutive_failures,
                "circuit opened"
            ),
            CircuitState::HalfOpen | CircuitState::Closed => info!(
                breaker = name,
                from = previous.as_str(),
                to = next.as_str(),
                "circuit state changed"
            ),
        }
    }

    fn retry_after(&self, recovery_timeout: Duration) -> Duration {
        let elapsed = self
            .last_failure_at
            .map_or(Duration::ZERO, |failed_at| failed_at.elapsed());
        recovery_timeout
            .saturating_sub(elapsed)
            .max(Duration::from_secs(1))
    }
}

/// Per-provider circuit breaker.
///
/// State is guarded by a single mutex that is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            half_open_max_calls: config.half_open_max_calls.max(1),
            ..config
        };
        let name = name.into();
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout.as_secs(),
            half_open_max_calls = config.half_open_max_calls,
            "circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                half_open_successes: 0,
                metrics: CircuitMetrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Admit or reject one call.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and admits the caller as a probe.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.metrics.total_requests += 1;

        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure_at
                .is_none_or(|failed_at| failed_at.elapsed() >= self.config.recovery_timeout);
            if !recovered {
                inner.metrics.rejected_requests += 1;
                return Err(CircuitOpenError {
                    breaker: self.name.clone(),
                    retry_after: inner.retry_after(self.config.recovery_timeout),
                });
            }
            inner.half_open_successes = 0;
            inner.transition(&self.name, CircuitState::HalfOpen);
        }

        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.metrics.successful_requests += 1;
        inner.metrics.last_success = Some(OffsetDateTime::now_utc());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.transition(&self.name, CircuitState::Closed);
                }
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.metrics.failed_requests += 1;
        inner.metrics.last_failure = Some(OffsetDateTime::now_utc());
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                inner.transition(&self.name, CircuitState::Open);
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.transition(&self.name, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state without triggering the open to half-open transition.
    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .expect("circuit breaker lock is not poisoned")
            .state
    }

    /// True while calls are being rejected.
    pub fn is_open(&self) -> bool {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state == CircuitState::Open
            && inner
                .last_failure_at
                .is_some_and(|failed_at| failed_at.elapsed() < self.config.recovery_timeout)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("circuit breaker lock is not poisoned")
            .consecutive_failures
    }

    pub fn metrics(&self) -> CircuitMetrics {
        self.inner
            .lock()
            .expect("circuit breaker lock is not poisoned")
            .metrics
            .clone()
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        let retry_after_secs = (inner.state == CircuitState::Open)
            .then(|| inner.retry_after(self.config.recovery_timeout).as_secs());

        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            half_open_successes: inner.half_open_successes,
            half_open_max_calls: self.config.half_open_max_calls,
            retry_after_secs,
            success_rate: inner.metrics.success_rate(),
            metrics: inner.metrics.clone(),
        }
    }

    /// Force the circuit closed and clear the failure counter. Metrics are kept.
    pub fn reset(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.last_failure_at = None;
        inner.transition(&self.name, CircuitState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;

    fn breaker(threshold: u32, recovery_ms: u64, probes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_millis(recovery_ms),
                half_open_max_calls: probes,
            },
        )
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = breaker(2, 10_000, 1);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        let error = breaker.try_acquire().expect_err("open circuit rejects");
        assert_eq!(error.breaker, "test");
        assert!(error.retry_after > Duration::ZERO);
        assert_eq!(breaker.metrics().rejected_requests, 1);
    }

    #[test]
    fn success_while_closed_resets_the_counter() {
        let breaker = breaker(3, 10_000, 1);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn probes_after_timeout_then_closes_after_enough_successes() {
        let breaker = breaker(1, 20, 2);
        breaker.record_failure();
        assert!(breaker.is_open());

        sleep(Duration::from_millis(30));
        breaker.try_acquire().expect("probe admitted");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.try_acquire().expect("second probe admitted");
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn failure_while_half_open_reopens() {
        let breaker = breaker(1, 20, 3);
        breaker.record_failure();
        sleep(Duration::from_millis(30));
        breaker.try_acquire().expect("probe admitted");

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn status_and_metrics_track_every_outcome() {
        let breaker = breaker(1, 10_000, 1);
        breaker.try_acquire().expect("closed");
        breaker.record_success();
        breaker.try_acquire().expect("closed");
        breaker.record_failure();
        let _ = breaker.try_acquire();

        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.failure_count, 1);
        assert!(status.retry_after_secs.is_some_and(|secs| secs >= 1));
        assert_eq!(status.metrics.total_requests, 3);
        assert_eq!(status.metrics.successful_requests, 1);
        assert_eq!(status.metrics.failed_requests, 1);
        assert_eq!(status.metrics.rejected_requests, 1);
        assert_eq!(status.metrics.state_changes, 1);
        assert!((status.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_closes_the_circuit() {
        let breaker = breaker(1, 10_000, 1);
        breaker.record_failure();
        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }
}
