//! Per-provider admission control.
//!
//! A [`ProviderGuard`] composes the three guards in a fixed order:
//! circuit breaker, then rate limiter, then concurrency limiter. An open
//! circuit fails before the caller queues on either limiter.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus};
use crate::concurrency::{ConcurrencyLimiter, ConcurrencyStatus};
use crate::data_source::{SourceError, SourceErrorKind};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::{RateLimiter, RateLimiterStatus};
use crate::ProviderId;

/// What to do when the rate limiter is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionMode {
    /// Wait for the window to slide.
    #[default]
    Blocking,
    /// Fail immediately with a rate-limited error.
    Opportunistic,
}

/// Health view of one provider's guards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub active_calls: usize,
    pub remaining_capacity: usize,
    pub circuit: CircuitStatus,
    pub rate_limit: RateLimiterStatus,
    pub concurrency: ConcurrencyStatus,
}

/// Breaker, rate limiter and concurrency limiter for one provider. Shared by
/// every request that talks to that provider.
#[derive(Debug)]
pub struct ProviderGuard {
    provider: ProviderId,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    concurrency: ConcurrencyLimiter,
}

impl ProviderGuard {
    pub fn new(
        provider: ProviderId,
        breaker: CircuitBreaker,
        limiter: RateLimiter,
        concurrency: ConcurrencyLimiter,
    ) -> Self {
        Self {
            provider,
            breaker,
            limiter,
            concurrency,
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        let name = policy.provider_id.as_str();
        Self::new(
            policy.provider_id,
            CircuitBreaker::new(name, policy.circuit),
            RateLimiter::new(name, policy.rate_limit),
            ConcurrencyLimiter::new(name, policy.max_concurrency),
        )
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiter {
        &self.concurrency
    }

    /// Run `operation` behind all three guards, waiting on the rate limiter.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        self.run_with(AdmissionMode::Blocking, operation).await
    }

    /// Run `operation` behind all three guards.
    ///
    /// The concurrency permit is held only while `operation` runs and is
    /// released on every exit path, including cancellation of the caller.
    pub async fn run_with<T, F, Fut>(
        &self,
        mode: AdmissionMode,
        operation: F,
    ) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        self.breaker.try_acquire()?;

        match mode {
            AdmissionMode::Blocking => self.limiter.acquire().await,
            AdmissionMode::Opportunistic => {
                if let Err(wait) = self.limiter.try_acquire() {
                    return Err(SourceError::rate_limited(
                        format!("{} rate limit reached", self.provider),
                        wait,
                    ));
                }
            }
        }

        let _permit = self.concurrency.acquire().await;
        let outcome = operation().await;

        match &outcome {
            Ok(_) => self.breaker.record_success(),
            Err(error) if trips_breaker(error) => {
                warn!(
                    provider = %self.provider,
                    code = error.code(),
                    error = %error,
                    "provider call failed"
                );
                self.breaker.record_failure();
            }
            Err(error) => debug!(
                provider = %self.provider,
                code = error.code(),
                "provider declined request"
            ),
        }
        outcome
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let circuit = self.breaker.status();
        let rate_limit = self.limiter.status();
        let concurrency = self.concurrency.status();

        AdmissionSnapshot {
            provider: self.provider,
            state: circuit.state,
            failure_count: circuit.failure_count,
            active_calls: concurrency.active,
            remaining_capacity: rate_limit.remaining,
            circuit,
            rate_limit,
            concurrency,
        }
    }
}

/// Upstream faults count against the breaker. Requests the provider can
/// never serve (coverage gaps, missing credentials) do not.
fn trips_breaker(error: &SourceError) -> bool {
    matches!(
        error.kind(),
        SourceErrorKind::Unavailable
            | SourceErrorKind::RateLimited
            | SourceErrorKind::InvalidResponse
            | SourceErrorKind::Timeout
            | SourceErrorKind::Internal
    )
}

/// The process-wide set of provider guards, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct AdmissionRegistry {
    guards: BTreeMap<ProviderId, Arc<ProviderGuard>>,
}

impl AdmissionRegistry {
    pub fn from_policies(policies: impl IntoIterator<Item = ProviderPolicy>) -> Self {
        let guards = policies
            .into_iter()
            .map(|policy| (policy.provider_id, Arc::new(ProviderGuard::from_policy(&policy))))
            .collect();
        Self { guards }
    }

    pub fn insert(&mut self, guard: Arc<ProviderGuard>) {
        self.guards.insert(guard.provider(), guard);
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<ProviderGuard>> {
        self.guards.get(&provider).cloned()
    }

    pub fn snapshots(&self) -> Vec<AdmissionSnapshot> {
        self.guards.values().map(|guard| guard.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::throttling::RateLimiterConfig;

    fn guard(threshold: u32, max_calls: usize) -> ProviderGuard {
        ProviderGuard::new(
            ProviderId::Pvgis,
            CircuitBreaker::new(
                "pvgis",
                CircuitBreakerConfig {
                    failure_threshold: threshold,
                    recovery_timeout: Duration::from_secs(60),
                    half_open_max_calls: 1,
                },
            ),
            RateLimiter::new("pvgis", RateLimiterConfig::per_minute(max_calls)),
            ConcurrencyLimiter::new("pvgis", 2),
        )
    }

    #[tokio::test]
    async fn open_circuit_fails_before_touching_the_limiters() {
        let guard = guard(1, 5);
        let _ = guard
            .run(|| async { Err::<(), _>(SourceError::unavailable("down")) })
            .await;

        let error = guard
            .run(|| async { Ok::<_, SourceError>(()) })
            .await
            .expect_err("circuit is open");

        assert!(error.is_circuit_open());
        assert!(error.retry_after().is_some_and(|wait| wait > Duration::ZERO));
        // Only the first call consumed a rate-limit slot.
        assert_eq!(guard.limiter().remaining(), 4);
    }

    #[tokio::test]
    async fn coverage_gaps_do_not_trip_the_breaker() {
        let guard = guard(1, 5);
        let _ = guard
            .run(|| async { Err::<(), _>(SourceError::out_of_coverage("polar")) })
            .await;

        assert_eq!(guard.breaker().state(), CircuitState::Closed);
        assert_eq!(guard.breaker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn opportunistic_mode_rejects_when_window_is_full() {
        let guard = guard(5, 1);
        guard
            .run_with(AdmissionMode::Opportunistic, || async { Ok::<_, SourceError>(1) })
            .await
            .expect("first call admitted");

        let error = guard
            .run_with(AdmissionMode::Opportunistic, || async { Ok::<_, SourceError>(2) })
            .await
            .expect_err("window is full");
        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn snapshot_reports_active_calls_while_running() {
        let guard = Arc::new(guard(5, 10));
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let running = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .run(|| async move {
                        let _ = entered_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, SourceError>(())
                    })
                    .await
            })
        };

        entered_rx.await.expect("operation started");
        let snapshot = guard.snapshot();
        assert_eq!(snapshot.active_calls, 1);
        assert_eq!(snapshot.remaining_capacity, 9);
        assert_eq!(snapshot.state, CircuitState::Closed);

        release_tx.send(()).expect("release");
        running.await.expect("join").expect("success");
        assert_eq!(guard.snapshot().active_calls, 0);
    }

    #[test]
    fn registry_builds_one_guard_per_policy() {
        let registry = AdmissionRegistry::from_policies([
            ProviderPolicy::cams_default(),
            ProviderPolicy::pvgis_default(),
        ]);

        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].provider, ProviderId::Cams);
        assert_eq!(snapshots[1].remaining_capacity, 20);
    }
}
