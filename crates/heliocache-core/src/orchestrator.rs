//! The layered lookup: hot tier, then warm proximity tier, then a racing
//! fetch that populates both.
//!
//! Cache-backend and provider failures stop here. They are logged, counted
//! and turned into misses or synthetic data; only [`ValidationError`]
//! reaches the caller of [`CacheOrchestrator::get_or_create_model`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use heliocache_warehouse::SweepReport;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionRegistry, AdmissionSnapshot};
use crate::cache::{hot_key, HotStore};
use crate::data_source::{previous_year, RadiationRequest};
use crate::error::{validate_coordinates, CoreError, ValidationError};
use crate::interpolation::{validate_area, validate_efficiency, InterpolationModel};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::racing::{ProviderFailure, SourceRacer};
use crate::warm::{CacheEntry, NewCacheEntry, WarmStore};
use crate::{DataTier, ProviderId};

pub const DEFAULT_HOT_TTL: Duration = Duration::from_secs(3_600);
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub hot_ttl: Duration,
    pub radius_km: f64,
    /// Year to request from providers. `None` means the last complete year.
    pub year: Option<i32>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            hot_ttl: DEFAULT_HOT_TTL,
            radius_km: DEFAULT_RADIUS_KM,
            year: None,
        }
    }
}

/// Where a resolved model came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum CacheLayer {
    Hot,
    Warm {
        entry_id: i64,
        distance_km: f64,
    },
    Fetched {
        winner: Option<ProviderId>,
        fell_back: bool,
        latency_ms: u64,
    },
}

/// A model plus how it was obtained.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub model: InterpolationModel,
    pub layer: CacheLayer,
    pub failures: Vec<ProviderFailure>,
}

/// Warm-tier aggregates plus orchestrator counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: u64,
    pub by_source: BTreeMap<String, u64>,
    pub by_tier: BTreeMap<String, u64>,
    pub expired_count: u64,
    pub oldest_entry: Option<String>,
    pub newest_entry: Option<String>,
    pub ttl_days: u32,
    pub metrics: CacheMetricsSnapshot,
}

pub struct CacheOrchestrator {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    racer: SourceRacer,
    registry: AdmissionRegistry,
    metrics: CacheMetrics,
    settings: CacheSettings,
}

impl CacheOrchestrator {
    pub fn new(
        hot: Arc<dyn HotStore>,
        warm: Arc<dyn WarmStore>,
        racer: SourceRacer,
        registry: AdmissionRegistry,
        settings: CacheSettings,
    ) -> Self {
        Self {
            hot,
            warm,
            racer,
            registry,
            metrics: CacheMetrics::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn racer(&self) -> &SourceRacer {
        &self.racer
    }

    /// Model for a coordinate, scaled to `area_m2`.
    ///
    /// # Errors
    /// Only [`ValidationError`]. Every other failure degrades to a cache
    /// miss or to synthetic data.
    pub async fn get_or_create_model(
        &self,
        latitude: f64,
        longitude: f64,
        area_m2: f64,
        panel_efficiency: f64,
    ) -> Result<InterpolationModel, ValidationError> {
        self.resolve(latitude, longitude, area_m2, panel_efficiency)
            .await
            .map(|resolved| resolved.model)
    }

    /// Like [`Self::get_or_create_model`], also reporting which layer answered.
    pub async fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        area_m2: f64,
        panel_efficiency: f64,
    ) -> Result<ResolvedModel, ValidationError> {
        validate_coordinates(latitude, longitude)?;
        validate_area(area_m2)?;
        validate_efficiency(panel_efficiency)?;

        let key = hot_key(latitude, longitude, self.settings.radius_km);

        if let Some(model) = self.hot_lookup(&key).await {
            self.metrics.record_hot_hit();
            debug!(key = %key, "hot tier hit");
            return Ok(ResolvedModel {
                model: model.rescaled(area_m2)?,
                layer: CacheLayer::Hot,
                failures: Vec::new(),
            });
        }

        if let Some(entry) = self.warm_lookup(latitude, longitude).await {
            self.metrics.record_warm_hit();
            let distance_km = entry.distance_km.unwrap_or_default();
            info!(
                latitude,
                longitude,
                entry_id = entry.id,
                distance_km,
                "warm tier hit"
            );
            self.hot_store(&key, &entry.model).await;
            return Ok(ResolvedModel {
                model: entry.model.rescaled(area_m2)?,
                layer: CacheLayer::Warm {
                    entry_id: entry.id,
                    distance_km,
                },
                failures: Vec::new(),
            });
        }

        self.metrics.record_miss();
        info!(latitude, longitude, "cache miss; racing radiation sources");
        let year = self.settings.year.unwrap_or_else(previous_year);
        let outcome = self
            .racer
            .fetch(RadiationRequest::new(latitude, longitude, year)?)
            .await;
        self.metrics.record_fetch(outcome.fell_back);

        let model = InterpolationModel::build(&outcome.data, area_m2, panel_efficiency)?;
        self.hot_store(&key, &model).await;

        if outcome.data.synthetic || outcome.data.data_tier == DataTier::Estimated {
            debug!(latitude, longitude, "synthetic model kept out of the warm tier");
        } else {
            let entry = NewCacheEntry {
                latitude,
                longitude,
                model: model.clone(),
                source_dataset: outcome.data.source_dataset().to_owned(),
                data_tier: outcome.data.data_tier,
                country_code: None,
            };
            match self.warm.save(entry).await {
                Ok(id) => debug!(id, latitude, longitude, "warm tier written"),
                Err(error) => {
                    self.metrics.record_warm_error();
                    warn!(latitude, longitude, error = %error, "warm tier write failed");
                }
            }
        }

        Ok(ResolvedModel {
            model,
            layer: CacheLayer::Fetched {
                winner: outcome.winner,
                fell_back: outcome.fell_back,
                latency_ms: outcome.latency_ms,
            },
            failures: outcome.failures,
        })
    }

    async fn hot_lookup(&self, key: &str) -> Option<InterpolationModel> {
        let payload = match self.hot.get(key).await {
            Ok(payload) => payload?,
            Err(error) => {
                self.metrics.record_hot_error();
                warn!(key, error = %error, "hot tier read failed; treating as miss");
                return None;
            }
        };

        match InterpolationModel::from_json(&payload) {
            Ok(model) if model.validate().is_ok() => Some(model),
            Ok(_) => {
                self.metrics.record_hot_error();
                warn!(key, "hot tier held an inconsistent model; treating as miss");
                None
            }
            Err(error) => {
                self.metrics.record_hot_error();
                warn!(key, error = %error, "hot tier payload undecodable; treating as miss");
                None
            }
        }
    }

    async fn hot_store(&self, key: &str, model: &InterpolationModel) {
        let payload = match model.to_json() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(key, error = %error, "model could not be encoded for the hot tier");
                return;
            }
        };
        if let Err(error) = self
            .hot
            .set_with_expiry(key, payload, self.settings.hot_ttl)
            .await
        {
            self.metrics.record_hot_error();
            warn!(key, error = %error, "hot tier write failed");
        }
    }

    async fn warm_lookup(&self, latitude: f64, longitude: f64) -> Option<CacheEntry> {
        self.warm_nearby(latitude, longitude, self.settings.radius_km)
            .await
    }

    async fn warm_nearby(&self, latitude: f64, longitude: f64, radius_km: f64) -> Option<CacheEntry> {
        match self.warm.find_nearby(latitude, longitude, radius_km).await {
            Ok(entry) => entry,
            Err(error) => {
                self.metrics.record_warm_error();
                warn!(latitude, longitude, error = %error, "warm tier lookup failed; treating as miss");
                None
            }
        }
    }

    /// Nearest unexpired warm entry within `radius_km`. Backend failures
    /// read as "nothing nearby".
    pub async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Option<CacheEntry>, ValidationError> {
        validate_coordinates(latitude, longitude)?;
        validate_radius(radius_km)?;
        Ok(self.warm_nearby(latitude, longitude, radius_km).await)
    }

    /// Write a model to the warm tier for an exact coordinate.
    pub async fn save(
        &self,
        latitude: f64,
        longitude: f64,
        model: InterpolationModel,
        source_dataset: impl Into<String>,
        data_tier: DataTier,
        country_code: Option<String>,
    ) -> Result<i64, CoreError> {
        validate_coordinates(latitude, longitude)?;
        model.validate()?;
        let id = self
            .warm
            .save(NewCacheEntry {
                latitude,
                longitude,
                model,
                source_dataset: source_dataset.into(),
                data_tier,
                country_code,
            })
            .await?;
        Ok(id)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<CacheEntry>, CoreError> {
        Ok(self.warm.find_by_id(id).await?)
    }

    /// Delete expired warm entries.
    pub async fn delete_expired(&self) -> Result<u64, CoreError> {
        Ok(self.sweep(false).await?.expired)
    }

    pub async fn sweep(&self, dry_run: bool) -> Result<SweepReport, CoreError> {
        let report = self.warm.sweep(dry_run).await?;
        info!(expired = report.expired, dry_run, "warm tier sweep finished");
        Ok(report)
    }

    pub async fn get_stats(&self) -> Result<CacheStats, CoreError> {
        let stats = self.warm.stats().await?;
        Ok(CacheStats {
            total_entries: stats.total_entries,
            by_source: stats.by_source,
            by_tier: stats.by_tier,
            expired_count: stats.expired_entries,
            oldest_entry: stats.oldest_entry.and_then(rfc3339),
            newest_entry: stats.newest_entry.and_then(rfc3339),
            ttl_days: self.warm.ttl_days(),
            metrics: self.metrics.snapshot(),
        })
    }

    /// Drop the hot entry for a coordinate. Returns whether one was removed.
    pub async fn invalidate(&self, latitude: f64, longitude: f64) -> Result<bool, CoreError> {
        validate_coordinates(latitude, longitude)?;
        let key = hot_key(latitude, longitude, self.settings.radius_km);
        let removed = self.hot.delete(&key).await?;
        info!(key = %key, removed, "hot tier entry invalidated");
        Ok(removed)
    }

    pub fn admission_snapshots(&self) -> Vec<AdmissionSnapshot> {
        self.registry.snapshots()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn validate_radius(radius_km: f64) -> Result<(), ValidationError> {
    if !radius_km.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "radius_km" });
    }
    if radius_km <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field: "radius_km" });
    }
    Ok(())
}

fn rfc3339(unix_seconds: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(unix_seconds)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use heliocache_warehouse::WarmStats;

    use super::*;
    use crate::cache::{MemoryHotStore, StoreFuture};
    use crate::data_source::{RadiationData, RadiationSource, SourceError};
    use crate::error::CacheBackendError;

    struct DownHot;

    impl HotStore for DownHot {
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
            Box::pin(async { Err(CacheBackendError::Hot(String::from("connection refused"))) })
        }

        fn set_with_expiry<'a>(&'a self, _key: &'a str, _value: String, _ttl: Duration) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(CacheBackendError::Hot(String::from("connection refused"))) })
        }

        fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, bool> {
            Box::pin(async { Err(CacheBackendError::Hot(String::from("connection refused"))) })
        }
    }

    struct DownWarm;

    impl WarmStore for DownWarm {
        fn find_nearby<'a>(&'a self, _: f64, _: f64, _: f64) -> StoreFuture<'a, Option<CacheEntry>> {
            Box::pin(async { Err(CacheBackendError::Hot(String::from("warm down"))) })
        }

        fn save<'a>(&'a self, _entry: NewCacheEntry) -> StoreFuture<'a, i64> {
            Box::pin(async { Err(CacheBackendError::Hot(String::from("warm down"))) })
        }

        fn find_by_id<'a>(&'a self, _id: i64) -> StoreFuture<'a, Option<CacheEntry>> {
            Box::pin(async { Ok(None) })
        }

        fn sweep<'a>(&'a self, dry_run: bool) -> StoreFuture<'a, SweepReport> {
            Box::pin(async move { Ok(SweepReport { expired: 0, dry_run }) })
        }

        fn stats<'a>(&'a self) -> StoreFuture<'a, WarmStats> {
            Box::pin(async { Ok(WarmStats::default()) })
        }

        fn ttl_days(&self) -> u32 {
            30
        }
    }

    struct Failing;

    impl RadiationSource for Failing {
        fn id(&self) -> ProviderId {
            ProviderId::Pvgis
        }

        fn fetch<'a>(
            &'a self,
            _request: RadiationRequest,
        ) -> Pin<Box<dyn Future<Output = Result<RadiationData, SourceError>> + Send + 'a>> {
            Box::pin(async { Err(SourceError::unavailable("offline")) })
        }
    }

    fn degraded() -> CacheOrchestrator {
        CacheOrchestrator::new(
            Arc::new(DownHot),
            Arc::new(DownWarm),
            SourceRacer::new(vec![Arc::new(Failing)]),
            AdmissionRegistry::default(),
            CacheSettings {
                year: Some(2024),
                ..CacheSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn fully_degraded_mode_still_answers_with_synthetic_model() {
        let orchestrator = degraded();

        let resolved = orchestrator
            .resolve(-33.45, -70.65, 15.0, 0.22)
            .await
            .expect("never fails on backend errors");

        assert_eq!(resolved.model.data_tier, DataTier::Estimated);
        assert!(matches!(
            resolved.layer,
            CacheLayer::Fetched { winner: None, fell_back: true, .. }
        ));
        assert_eq!(resolved.failures.len(), 1);

        let metrics = orchestrator.metrics();
        assert_eq!(metrics.hot_errors, 2);
        assert_eq!(metrics.warm_errors, 1);
        assert_eq!(metrics.synthetic_fallbacks, 1);
    }

    #[tokio::test]
    async fn validation_errors_reach_the_caller() {
        let orchestrator = degraded();
        assert_eq!(
            orchestrator.get_or_create_model(91.0, 0.0, 15.0, 0.22).await,
            Err(ValidationError::LatitudeOutOfRange { value: 91.0 })
        );
        assert!(orchestrator.get_or_create_model(0.0, 0.0, -1.0, 0.22).await.is_err());
        assert!(orchestrator.find_nearby(0.0, 0.0, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn synthetic_models_stay_hot_and_rescale_on_the_next_hit() {
        let hot = Arc::new(MemoryHotStore::new());
        let orchestrator = CacheOrchestrator::new(
            hot.clone(),
            Arc::new(DownWarm),
            SourceRacer::new(vec![Arc::new(Failing)]),
            AdmissionRegistry::default(),
            CacheSettings::default(),
        );

        let first = orchestrator.resolve(10.0, 10.0, 15.0, 0.22).await.expect("first");
        let second = orchestrator.resolve(10.0, 10.0, 30.0, 0.22).await.expect("second");

        assert_eq!(second.layer, CacheLayer::Hot);
        assert!((second.model.optimal_annual_kwh - 2.0 * first.model.optimal_annual_kwh).abs() < 1e-9);
        // The failing warm store was never asked to save a synthetic model.
        assert_eq!(orchestrator.metrics().warm_errors, 1);

        assert!(orchestrator.invalidate(10.0, 10.0).await.expect("invalidate"));
        assert!(hot.is_empty().await);
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        assert_eq!(rfc3339(0).as_deref(), Some("1970-01-01T00:00:00Z"));
    }
}
