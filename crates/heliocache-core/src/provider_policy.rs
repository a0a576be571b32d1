use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use crate::throttling::RateLimiterConfig;
use crate::ProviderId;

/// Admission and retry limits for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub circuit: CircuitBreakerConfig,
    pub rate_limit: RateLimiterConfig,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Per-request HTTP timeout. The racing fetcher's deadline applies on top.
    pub request_timeout: Duration,
}

impl ProviderPolicy {
    /// The ADS job API is slow and strictly metered.
    pub fn cams_default() -> Self {
        Self {
            provider_id: ProviderId::Cams,
            circuit: CircuitBreakerConfig::cams(),
            rate_limit: RateLimiterConfig::per_minute(10),
            max_concurrency: 5,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn pvgis_default() -> Self {
        Self {
            provider_id: ProviderId::Pvgis,
            circuit: CircuitBreakerConfig::pvgis(),
            rate_limit: RateLimiterConfig::per_minute(20),
            max_concurrency: 10,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(20),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Cams => Self::cams_default(),
            ProviderId::Pvgis => Self::pvgis_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cams_policy_matches_ads_limits() {
        let policy = ProviderPolicy::cams_default();

        assert_eq!(policy.provider_id, ProviderId::Cams);
        assert_eq!(policy.max_concurrency, 5);
        assert_eq!(policy.rate_limit.max_calls, 10);
        assert_eq!(policy.circuit.failure_threshold, 5);
        assert_eq!(policy.circuit.half_open_max_calls, 2);
    }

    #[test]
    fn pvgis_policy_matches_jrc_limits() {
        let policy = ProviderPolicy::default_for(ProviderId::Pvgis);

        assert_eq!(policy.max_concurrency, 10);
        assert_eq!(policy.rate_limit.max_calls, 20);
        assert_eq!(policy.rate_limit.window, Duration::from_secs(60));
        assert_eq!(policy.circuit.recovery_timeout, Duration::from_secs(30));
    }
}
