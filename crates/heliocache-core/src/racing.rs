//! First-valid-wins fetch across every configured provider.
//!
//! Each provider runs as its own task behind its admission guard. Results
//! are taken in completion order; the first one that passes the quality
//! check wins and the remaining tasks are aborted. When every provider fails
//! or the global deadline passes, [`SourceRacer::fetch`] answers with
//! deterministic synthetic data instead of an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::data_source::{RadiationData, RadiationRequest, RadiationSource, SourceError};
use crate::synthetic::SyntheticGenerator;
use crate::ProviderId;

pub const DEFAULT_RACE_TIMEOUT: Duration = Duration::from_secs(35);

/// One provider's failure during a race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ProviderFailure {
    fn new(provider: ProviderId, error: &SourceError) -> Self {
        Self {
            provider,
            code: error.code(),
            message: error.message().to_owned(),
            retry_after_seconds: error.retry_after().map(|wait| wait.as_secs()),
        }
    }
}

/// A provider won the race.
#[derive(Debug, Clone)]
pub struct RaceSuccess {
    pub data: RadiationData,
    pub winner: ProviderId,
    pub failures: Vec<ProviderFailure>,
    pub latency_ms: u64,
}

/// No provider produced valid data before the deadline.
#[derive(Debug, Clone, Error)]
#[error("no radiation source produced valid data ({} failed{})", .failures.len(), deadline_note(.timed_out))]
pub struct RaceFailure {
    pub failures: Vec<ProviderFailure>,
    pub timed_out: bool,
    pub latency_ms: u64,
}

/// What [`SourceRacer::fetch`] hands back. Always carries data.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub data: RadiationData,
    pub winner: Option<ProviderId>,
    pub failures: Vec<ProviderFailure>,
    pub latency_ms: u64,
    pub fell_back: bool,
}

pub struct SourceRacer {
    sources: Vec<Arc<dyn RadiationSource>>,
    timeout: Duration,
    synthetic: SyntheticGenerator,
}

impl SourceRacer {
    pub fn new(sources: Vec<Arc<dyn RadiationSource>>) -> Self {
        Self {
            sources,
            timeout: DEFAULT_RACE_TIMEOUT,
            synthetic: SyntheticGenerator::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_synthetic(mut self, synthetic: SyntheticGenerator) -> Self {
        self.synthetic = synthetic;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.sources.iter().map(|source| source.id()).collect()
    }

    /// Race every source and return the first valid result.
    ///
    /// # Errors
    /// Returns [`RaceFailure`] when all sources fail, or when the deadline
    /// passes first. Losing tasks are aborted either way.
    pub async fn race(&self, request: RadiationRequest) -> Result<RaceSuccess, RaceFailure> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut failures = Vec::new();

        let mut racers = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            racers.spawn(async move {
                let provider = source.id();
                (provider, source.fetch(request).await)
            });
        }

        loop {
            let next = match tokio::time::timeout_at(deadline, racers.join_next()).await {
                Ok(next) => next,
                Err(_) => {
                    racers.abort_all();
                    warn!(
                        latitude = request.latitude,
                        longitude = request.longitude,
                        timeout_secs = self.timeout.as_secs(),
                        "radiation race deadline passed"
                    );
                    return Err(RaceFailure {
                        failures,
                        timed_out: true,
                        latency_ms: elapsed_ms(started),
                    });
                }
            };

            match next {
                Some(Ok((provider, Ok(data)))) => match data.check_quality() {
                    Ok(()) => {
                        racers.abort_all();
                        let latency_ms = elapsed_ms(started);
                        info!(
                            provider = %provider,
                            source = %data.source_label,
                            latency_ms,
                            rejected = failures.len(),
                            "radiation race won"
                        );
                        return Ok(RaceSuccess {
                            data,
                            winner: provider,
                            failures,
                            latency_ms,
                        });
                    }
                    Err(error) => {
                        debug!(provider = %provider, error = %error, "rejected provider result");
                        failures.push(ProviderFailure::new(provider, &error));
                    }
                },
                Some(Ok((provider, Err(error)))) => {
                    debug!(provider = %provider, code = error.code(), error = %error, "provider dropped out of race");
                    failures.push(ProviderFailure::new(provider, &error));
                }
                Some(Err(join_error)) => {
                    warn!(error = %join_error, "radiation racer task panicked");
                }
                None => {
                    return Err(RaceFailure {
                        failures,
                        timed_out: false,
                        latency_ms: elapsed_ms(started),
                    });
                }
            }
        }
    }

    /// Race, falling back to synthetic data when nothing valid arrives.
    pub async fn fetch(&self, request: RadiationRequest) -> FetchOutcome {
        match self.race(request).await {
            Ok(success) => FetchOutcome {
                data: success.data,
                winner: Some(success.winner),
                failures: success.failures,
                latency_ms: success.latency_ms,
                fell_back: false,
            },
            Err(failure) => {
                warn!(
                    latitude = request.latitude,
                    longitude = request.longitude,
                    error = %failure,
                    "using synthetic radiation data"
                );
                FetchOutcome {
                    data: self
                        .synthetic
                        .generate(request.latitude, request.longitude, request.year),
                    winner: None,
                    failures: failure.failures,
                    latency_ms: failure.latency_ms,
                    fell_back: true,
                }
            }
        }
    }
}

fn deadline_note(timed_out: &bool) -> &'static str {
    if *timed_out {
        ", deadline passed"
    } else {
        ""
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use super::*;
    use crate::DataTier;

    struct Fixed {
        id: ProviderId,
        delay: Duration,
        answer: Result<RadiationData, SourceError>,
    }

    impl RadiationSource for Fixed {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn fetch<'a>(
            &'a self,
            _request: RadiationRequest,
        ) -> Pin<Box<dyn Future<Output = Result<RadiationData, SourceError>> + Send + 'a>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.answer.clone()
            })
        }
    }

    fn data(label: &str) -> RadiationData {
        RadiationData {
            latitude: -33.45,
            longitude: -70.65,
            year: 2024,
            monthly_irradiance: [150.0; 12],
            data_tier: DataTier::Engineering,
            source_label: label.to_owned(),
            synthetic: false,
            elevation_m: None,
        }
    }

    fn source(id: ProviderId, delay_ms: u64, answer: Result<RadiationData, SourceError>) -> Arc<dyn RadiationSource> {
        Arc::new(Fixed {
            id,
            delay: Duration::from_millis(delay_ms),
            answer,
        })
    }

    fn request() -> RadiationRequest {
        RadiationRequest::new(-33.45, -70.65, 2024).expect("valid")
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_valid_result_wins() {
        let racer = SourceRacer::new(vec![
            source(ProviderId::Cams, 500, Ok(data("CAMS"))),
            source(ProviderId::Pvgis, 100, Ok(data("PVGIS"))),
        ]);

        let success = racer.race(request()).await.expect("winner");
        assert_eq!(success.winner, ProviderId::Pvgis);
        assert!(success.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_from_faster_provider_loses_to_real_data() {
        let mut placeholder = data("CAMS Solar Radiation Timeseries (Mock Data)");
        placeholder.synthetic = true;
        let racer = SourceRacer::new(vec![
            source(ProviderId::Cams, 10, Ok(placeholder)),
            source(ProviderId::Pvgis, 200, Ok(data("PVGIS"))),
        ]);

        let success = racer.race(request()).await.expect("winner");
        assert_eq!(success.winner, ProviderId::Pvgis);
        assert_eq!(success.failures.len(), 1);
        assert_eq!(success.failures[0].code, "source.invalid_response");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_falls_back_to_synthetic_data() {
        let racer = SourceRacer::new(vec![source(ProviderId::Pvgis, 60_000, Ok(data("PVGIS")))])
            .with_timeout(Duration::from_secs(1));

        let outcome = racer.fetch(request()).await;
        assert!(outcome.fell_back);
        assert!(outcome.winner.is_none());
        assert!(outcome.data.synthetic);
        assert_eq!(outcome.data.data_tier, DataTier::Estimated);
    }

    #[tokio::test]
    async fn no_sources_is_an_exhausted_race() {
        let failure = SourceRacer::new(Vec::new())
            .race(request())
            .await
            .expect_err("nothing to race");
        assert!(!failure.timed_out);
        assert_eq!(failure.to_string(), "no radiation source produced valid data (0 failed)");
    }
}
