//! Warm tier: the persistent, proximity-searchable store of models.
//!
//! [`DuckDbWarmStore`] bridges the synchronous warehouse onto the async
//! runtime with `spawn_blocking`, and converts between stored JSON and
//! [`InterpolationModel`] at the boundary.

use std::sync::Arc;

use heliocache_warehouse::{
    CachedLocation, LocationRecord, SweepReport, WarmStats, Warehouse, WarehouseError,
};
use serde::Serialize;
use tracing::debug;

use crate::cache::StoreFuture;
use crate::clock::Clock;
use crate::error::CacheBackendError;
use crate::interpolation::InterpolationModel;
use crate::source::DataTier;

pub const DEFAULT_WARM_TTL_DAYS: u32 = 30;

/// A model stored in the warm tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip)]
    pub model: InterpolationModel,
    pub source_dataset: String,
    pub data_tier: DataTier,
    pub country_code: Option<String>,
    pub ttl_days: u32,
    pub created_at: i64,
    pub updated_at: i64,
    /// Set on proximity hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// A model to write for an exact coordinate.
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub model: InterpolationModel,
    pub source_dataset: String,
    pub data_tier: DataTier,
    pub country_code: Option<String>,
}

pub trait WarmStore: Send + Sync {
    /// Nearest unexpired entry within `radius_km`.
    fn find_nearby<'a>(
        &'a self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> StoreFuture<'a, Option<CacheEntry>>;

    /// Insert, or replace the entry at the same exact coordinate. Returns the id.
    fn save<'a>(&'a self, entry: NewCacheEntry) -> StoreFuture<'a, i64>;

    fn find_by_id<'a>(&'a self, id: i64) -> StoreFuture<'a, Option<CacheEntry>>;

    /// Sweep expired entries. With `dry_run` only counts them.
    fn sweep<'a>(&'a self, dry_run: bool) -> StoreFuture<'a, SweepReport>;

    fn stats<'a>(&'a self) -> StoreFuture<'a, WarmStats>;

    fn ttl_days(&self) -> u32;
}

/// Warm store backed by the DuckDB warehouse.
#[derive(Clone)]
pub struct DuckDbWarmStore {
    warehouse: Arc<Warehouse>,
    clock: Arc<dyn Clock>,
    ttl_days: u32,
}

impl DuckDbWarmStore {
    pub fn new(warehouse: Warehouse, clock: Arc<dyn Clock>, ttl_days: u32) -> Self {
        Self {
            warehouse: Arc::new(warehouse),
            clock,
            ttl_days,
        }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, CacheBackendError>
    where
        T: Send + 'static,
        F: FnOnce(&Warehouse, i64) -> Result<T, CacheBackendError> + Send + 'static,
    {
        let warehouse = Arc::clone(&self.warehouse);
        let now = self.clock.unix_now();
        tokio::task::spawn_blocking(move || operation(&warehouse, now)).await?
    }
}

fn into_entry(location: CachedLocation, distance_km: Option<f64>) -> Result<CacheEntry, CacheBackendError> {
    let model = InterpolationModel::from_json(&location.model_json)?;
    model.validate()?;
    let data_tier = location
        .data_tier
        .parse::<DataTier>()
        .map_err(|error| WarehouseError::InvalidRecord(error.to_string()))?;

    Ok(CacheEntry {
        id: location.id,
        latitude: location.latitude,
        longitude: location.longitude,
        model,
        source_dataset: location.source_dataset,
        data_tier,
        country_code: location.country_code,
        ttl_days: location.ttl_days,
        created_at: location.created_at,
        updated_at: location.updated_at,
        distance_km,
    })
}

impl WarmStore for DuckDbWarmStore {
    fn find_nearby<'a>(
        &'a self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> StoreFuture<'a, Option<CacheEntry>> {
        Box::pin(self.blocking(move |warehouse, now| {
            match warehouse.find_nearest(latitude, longitude, radius_km, now)? {
                Some(nearby) => {
                    debug!(id = nearby.location.id, distance_km = nearby.distance_km, "warm proximity match");
                    into_entry(nearby.location, Some(nearby.distance_km)).map(Some)
                }
                None => Ok(None),
            }
        }))
    }

    fn save<'a>(&'a self, entry: NewCacheEntry) -> StoreFuture<'a, i64> {
        let ttl_days = self.ttl_days;
        Box::pin(self.blocking(move |warehouse, now| {
            let record = LocationRecord {
                latitude: entry.latitude,
                longitude: entry.longitude,
                model_json: entry.model.to_json()?,
                source_dataset: entry.source_dataset,
                data_tier: entry.data_tier.to_string(),
                country_code: entry.country_code,
                ttl_days,
            };
            Ok(warehouse.upsert_location(&record, now)?)
        }))
    }

    fn find_by_id<'a>(&'a self, id: i64) -> StoreFuture<'a, Option<CacheEntry>> {
        Box::pin(self.blocking(move |warehouse, _| {
            warehouse
                .find_by_id(id)?
                .map(|location| into_entry(location, None))
                .transpose()
        }))
    }

    fn sweep<'a>(&'a self, dry_run: bool) -> StoreFuture<'a, SweepReport> {
        Box::pin(self.blocking(move |warehouse, now| Ok(warehouse.sweep(now, dry_run)?)))
    }

    fn stats<'a>(&'a self) -> StoreFuture<'a, WarmStats> {
        Box::pin(self.blocking(|warehouse, now| Ok(warehouse.stats(now)?)))
    }

    fn ttl_days(&self) -> u32 {
        self.ttl_days
    }
}
