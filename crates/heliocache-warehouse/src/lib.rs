//! # Heliocache Warehouse
//!
//! DuckDB-backed warm tier for precomputed solar interpolation models.
//!
//! ## Overview
//!
//! Every row of `cached_locations` holds one serialized interpolation model
//! for an exact coordinate. The crate is deliberately unaware of the model
//! type: models travel as JSON text and the async bridge in `heliocache-core`
//! encodes and decodes them.
//!
//! ### Features
//!
//! - **Upsert on coordinate conflict**: one row per `(latitude, longitude)`,
//!   the later writer wins
//! - **Proximity lookup**: nearest unexpired row within a radius, either by
//!   haversine distance or by an equirectangular approximation
//! - **TTL sweep**: bulk delete of rows older than their own `cache_ttl_days`
//! - **Stats**: counts by source dataset and data tier
//!
//! Timestamps are Unix seconds supplied by the caller, so expiry decisions
//! can be driven by any clock.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heliocache_warehouse::{LocationRecord, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let now = 1_760_000_000;
//!
//!     let id = warehouse.upsert_location(
//!         &LocationRecord {
//!             latitude: -33.45,
//!             longitude: -70.65,
//!             model_json: String::from("{}"),
//!             source_dataset: String::from("PVGIS"),
//!             data_tier: String::from("engineering"),
//!             country_code: Some(String::from("CHL")),
//!             ttl_days: 30,
//!         },
//!         now,
//!     )?;
//!
//!     let nearby = warehouse.find_nearest(-33.44, -70.64, 5.0, now)?;
//!     assert_eq!(nearby.map(|hit| hit.location.id), Some(id));
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `cached_locations` | Precomputed models keyed by exact coordinate |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod geo;
pub mod migrations;

use std::collections::BTreeMap;
use std::env;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use ::duckdb::{Connection, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use geo::{
    equirectangular_km, haversine_km, LongitudeRange, SearchBounds, EARTH_RADIUS_KM, KM_PER_DEGREE,
};

const SECONDS_PER_DAY: i64 = 86_400;
const MAX_WRITE_ATTEMPTS: u32 = 10;
const WRITE_BACKOFF_BASE: Duration = Duration::from_millis(5);
const WRITE_BACKOFF_CAP: Duration = Duration::from_millis(250);

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A record was rejected before reaching the database.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Unknown proximity mode name.
    #[error("unknown proximity mode '{0}', expected 'geodesic' or 'bbox'")]
    UnknownProximityMode(String),
}

/// Distance model used by [`Warehouse::find_nearest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProximityMode {
    /// Haversine great-circle distance.
    #[default]
    Geodesic,
    /// Degree offsets with `cos(latitude)` longitude scaling.
    #[serde(rename = "bbox")]
    BoundingBox,
}

impl ProximityMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Geodesic => "geodesic",
            Self::BoundingBox => "bbox",
        }
    }
}

impl Display for ProximityMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProximityMode {
    type Err = WarehouseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "geodesic" | "haversine" => Ok(Self::Geodesic),
            "bbox" | "bounding_box" | "equirectangular" => Ok(Self::BoundingBox),
            other => Err(WarehouseError::UnknownProximityMode(other.to_owned())),
        }
    }
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for heliocache data.
    pub heliocache_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
    /// Requested distance model; downgraded at open when unsupported.
    pub proximity_mode: ProximityMode,
}

impl WarehouseConfig {
    /// Configuration rooted at `home`, with the database under `cache/`.
    #[must_use]
    pub fn in_home(home: impl Into<PathBuf>) -> Self {
        let heliocache_home = home.into();
        let db_path = heliocache_home.join("cache").join("warm.duckdb");
        Self {
            heliocache_home,
            db_path,
            max_pool_size: 4,
            proximity_mode: ProximityMode::default(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::in_home(resolve_heliocache_home())
    }
}

/// A model to persist for an exact coordinate.
#[derive(Debug, Clone)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub model_json: String,
    pub source_dataset: String,
    pub data_tier: String,
    pub country_code: Option<String>,
    pub ttl_days: u32,
}

/// A stored row of `cached_locations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedLocation {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip)]
    pub model_json: String,
    pub source_dataset: String,
    pub data_tier: String,
    pub country_code: Option<String>,
    pub ttl_days: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CachedLocation {
    /// Unix second after which the row counts as expired.
    #[must_use]
    pub const fn expires_at(&self) -> i64 {
        self.created_at + self.ttl_days as i64 * SECONDS_PER_DAY
    }

    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at()
    }
}

/// Result of a proximity lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyLocation {
    #[serde(flatten)]
    pub location: CachedLocation,
    pub distance_km: f64,
}

/// Aggregate view of the warm tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmStats {
    pub total_entries: u64,
    pub by_source: BTreeMap<String, u64>,
    pub by_tier: BTreeMap<String, u64>,
    pub expired_entries: u64,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}

/// Outcome of an expiry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rows deleted, or rows that would be deleted when `dry_run` is set.
    pub expired: u64,
    pub dry_run: bool,
}

/// The warm store for precomputed models.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
    proximity_mode: ProximityMode,
    /// Serializes upserts issued through this handle.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Warehouse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warehouse")
            .field("db_path", &self.config.db_path)
            .field("proximity_mode", &self.proximity_mode)
            .finish_non_exhaustive()
    }
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let proximity_mode = config.proximity_mode;
        let mut warehouse = Self {
            config,
            manager,
            proximity_mode,
            write_lock: Arc::new(Mutex::new(())),
        };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply migrations and settle the effective proximity mode.
    pub fn initialize(&mut self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;

        if self.proximity_mode == ProximityMode::Geodesic && !supports_geodesic(&connection) {
            warn!(
                db_path = %self.config.db_path.display(),
                "trigonometric SQL functions unavailable; falling back to bounding-box proximity"
            );
            self.proximity_mode = ProximityMode::BoundingBox;
        }
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Distance model actually used by proximity lookups.
    pub const fn proximity_mode(&self) -> ProximityMode {
        self.proximity_mode
    }

    /// Insert a model, or replace the payload of the row already stored for
    /// the same exact coordinate. Returns the row id.
    ///
    /// The conflict path also restarts the TTL window (`created_at = now`).
    /// Writers sharing this handle take turns; a transaction conflict with
    /// another connection is retried with jittered exponential backoff.
    pub fn upsert_location(&self, record: &LocationRecord, now: i64) -> Result<i64, WarehouseError> {
        validate_record(record)?;

        let mut attempt = 1;
        loop {
            let outcome = {
                let _turn = self
                    .write_lock
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                self.try_upsert(record, now)
            };
            match outcome {
                Ok(id) => return Ok(id),
                Err(WarehouseError::DuckDb(error))
                    if attempt < MAX_WRITE_ATTEMPTS && is_write_conflict(&error) =>
                {
                    let delay = write_backoff(attempt);
                    debug!(
                        attempt,
                        latitude = record.latitude,
                        longitude = record.longitude,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "warm store write conflict; retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn try_upsert(&self, record: &LocationRecord, now: i64) -> Result<i64, WarehouseError> {
        let connection = self.manager.acquire()?;
        let ttl_days = i64::from(record.ttl_days);

        // SECURITY: every value is bound as a parameter.
        let params: [&dyn ToSql; 9] = [
            &record.latitude,
            &record.longitude,
            &record.model_json,
            &record.data_tier,
            &record.source_dataset,
            &record.country_code,
            &ttl_days,
            &now,
            &now,
        ];
        connection.execute(
            "INSERT INTO cached_locations \
             (latitude, longitude, interpolation_model, data_tier, source_dataset, \
              country_code, cache_ttl_days, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (latitude, longitude) DO UPDATE SET \
               interpolation_model = EXCLUDED.interpolation_model, \
               data_tier = EXCLUDED.data_tier, \
               source_dataset = EXCLUDED.source_dataset, \
               country_code = EXCLUDED.country_code, \
               cache_ttl_days = EXCLUDED.cache_ttl_days, \
               created_at = EXCLUDED.created_at, \
               updated_at = EXCLUDED.updated_at",
            params.as_slice(),
        )?;

        let params: [&dyn ToSql; 2] = [&record.latitude, &record.longitude];
        let id = connection.query_row(
            "SELECT CAST(id AS BIGINT) FROM cached_locations WHERE latitude = ? AND longitude = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Nearest unexpired row within `radius_km`, using the configured
    /// distance model.
    pub fn find_nearest(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        now: i64,
    ) -> Result<Option<NearbyLocation>, WarehouseError> {
        self.find_nearest_with(self.proximity_mode, latitude, longitude, radius_km, now)
    }

    /// Nearest unexpired row within `radius_km` using an explicit distance
    /// model.
    pub fn find_nearest_with(
        &self,
        mode: ProximityMode,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        now: i64,
    ) -> Result<Option<NearbyLocation>, WarehouseError> {
        if !(latitude.is_finite() && longitude.is_finite() && radius_km.is_finite()) {
            return Err(WarehouseError::InvalidRecord(String::from(
                "proximity query coordinates must be finite",
            )));
        }
        if radius_km < 0.0 {
            return Err(WarehouseError::InvalidRecord(String::from(
                "proximity radius must not be negative",
            )));
        }

        let bounds = SearchBounds::around(latitude, longitude, radius_km);
        let (west, east) = bounds.longitude.bounds();
        let distance_sql = match mode {
            ProximityMode::Geodesic => format!(
                "2 * CAST({EARTH_RADIUS_KM} AS DOUBLE) * asin(least(1.0, sqrt(\
                   pow(sin(radians(latitude - ?) / 2), 2) \
                   + cos(radians(?)) * cos(radians(latitude)) \
                   * pow(sin(radians(longitude - ?) / 2), 2))))"
            ),
            ProximityMode::BoundingBox => format!(
                "CAST({KM_PER_DEGREE} AS DOUBLE) * sqrt(\
                   pow(latitude - ?, 2) \
                   + pow((longitude - ?) * cos(radians(?)), 2))"
            ),
        };
        let sql = format!(
            "SELECT id, latitude, longitude, interpolation_model, data_tier, source_dataset, \
                    country_code, cache_ttl_days, created_at, updated_at, distance_km \
             FROM ( \
                 SELECT CAST(id AS BIGINT) AS id, latitude, longitude, interpolation_model, \
                        data_tier, source_dataset, country_code, \
                        CAST(cache_ttl_days AS BIGINT) AS cache_ttl_days, created_at, \
                        updated_at, {distance_sql} AS distance_km \
                 FROM cached_locations \
                 WHERE latitude BETWEEN ? AND ? \
                   AND {longitude_sql} \
                   AND created_at + CAST(cache_ttl_days AS BIGINT) * {SECONDS_PER_DAY} >= ? \
             ) candidates \
             WHERE distance_km <= ? \
             ORDER BY distance_km ASC, id ASC \
             LIMIT 1",
            longitude_sql = bounds.longitude.sql_predicate(),
        );

        let distance_params: [&dyn ToSql; 3] = match mode {
            ProximityMode::Geodesic => [&latitude, &latitude, &longitude],
            ProximityMode::BoundingBox => [&latitude, &longitude, &latitude],
        };
        let filter_params: [&dyn ToSql; 6] = [
            &bounds.min_latitude,
            &bounds.max_latitude,
            &west,
            &east,
            &now,
            &radius_km,
        ];
        let params: Vec<&dyn ToSql> = distance_params
            .into_iter()
            .chain(filter_params)
            .collect();

        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query(params.as_slice())?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        Ok(Some(NearbyLocation {
            location: read_location(row)?,
            distance_km: row.get(10)?,
        }))
    }

    /// Fetch a row by id regardless of expiry.
    pub fn find_by_id(&self, id: i64) -> Result<Option<CachedLocation>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT CAST(id AS BIGINT), latitude, longitude, interpolation_model, data_tier, \
                    source_dataset, country_code, CAST(cache_ttl_days AS BIGINT), created_at, \
                    updated_at \
             FROM cached_locations WHERE id = ?",
        )?;
        let mut rows = statement.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_location(row)?)),
            None => Ok(None),
        }
    }

    /// Delete every row whose age exceeds its own TTL. Returns the number of
    /// rows removed.
    pub fn delete_expired(&self, now: i64) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire()?;
        let deleted = connection.execute(
            &format!(
                "DELETE FROM cached_locations \
                 WHERE created_at + CAST(cache_ttl_days AS BIGINT) * {SECONDS_PER_DAY} < ?"
            ),
            [now],
        )?;
        Ok(deleted as u64)
    }

    /// Count the rows [`Warehouse::delete_expired`] would remove.
    pub fn count_expired(&self, now: i64) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire()?;
        count_expired(&connection, now)
    }

    /// Run a sweep, or only count what it would delete.
    pub fn sweep(&self, now: i64, dry_run: bool) -> Result<SweepReport, WarehouseError> {
        let expired = if dry_run {
            self.count_expired(now)?
        } else {
            self.delete_expired(now)?
        };
        Ok(SweepReport { expired, dry_run })
    }

    /// Aggregate counts over the whole table.
    pub fn stats(&self, now: i64) -> Result<WarmStats, WarehouseError> {
        let connection = self.manager.acquire()?;

        let (total, oldest, newest): (i64, Option<i64>, Option<i64>) = connection.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM cached_locations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(WarmStats {
            total_entries: total.max(0) as u64,
            by_source: grouped_counts(&connection, "source_dataset")?,
            by_tier: grouped_counts(&connection, "data_tier")?,
            expired_entries: count_expired(&connection, now)?,
            oldest_entry: oldest,
            newest_entry: newest,
        })
    }
}

fn count_expired(connection: &Connection, now: i64) -> Result<u64, WarehouseError> {
    let count: i64 = connection.query_row(
        &format!(
            "SELECT COUNT(*) FROM cached_locations \
             WHERE created_at + CAST(cache_ttl_days AS BIGINT) * {SECONDS_PER_DAY} < ?"
        ),
        [now],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

/// `column` is always one of our own literal column names.
fn grouped_counts(
    connection: &Connection,
    column: &'static str,
) -> Result<BTreeMap<String, u64>, WarehouseError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM cached_locations GROUP BY {column}"
    ))?;
    let rows = statement.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        counts.insert(key, count.max(0) as u64);
    }
    Ok(counts)
}

fn read_location(row: &::duckdb::Row<'_>) -> Result<CachedLocation, ::duckdb::Error> {
    let ttl_days: i64 = row.get(7)?;
    Ok(CachedLocation {
        id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        model_json: row.get(3)?,
        data_tier: row.get(4)?,
        source_dataset: row.get(5)?,
        country_code: row.get(6)?,
        ttl_days: u32::try_from(ttl_days).unwrap_or(0),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn validate_record(record: &LocationRecord) -> Result<(), WarehouseError> {
    if !(-90.0..=90.0).contains(&record.latitude) {
        return Err(WarehouseError::InvalidRecord(format!(
            "latitude {} out of range [-90, 90]",
            record.latitude
        )));
    }
    if !(-180.0..=180.0).contains(&record.longitude) {
        return Err(WarehouseError::InvalidRecord(format!(
            "longitude {} out of range [-180, 180]",
            record.longitude
        )));
    }
    if record.source_dataset.trim().is_empty() {
        return Err(WarehouseError::InvalidRecord(String::from(
            "source dataset must not be empty",
        )));
    }
    if let Some(code) = &record.country_code {
        if code.len() > 3 {
            return Err(WarehouseError::InvalidRecord(format!(
                "country code '{code}' is longer than 3 characters"
            )));
        }
    }
    Ok(())
}

fn supports_geodesic(connection: &Connection) -> bool {
    connection
        .query_row(
            "SELECT asin(least(1.0, sqrt(pow(sin(radians(1.0)), 2) * cos(radians(1.0)))))",
            [],
            |row| row.get::<_, f64>(0),
        )
        .map(f64::is_finite)
        .unwrap_or(false)
}

/// Exponential delay before write retry `attempt`, capped, with up to 50%
/// extra jitter so colliding writers spread out.
fn write_backoff(attempt: u32) -> Duration {
    let exponential = WRITE_BACKOFF_BASE.saturating_mul(1 << attempt.saturating_sub(1).min(16));
    let base = exponential.min(WRITE_BACKOFF_CAP);
    let jitter_ms = fastrand::u64(0..=(base.as_millis() as u64 / 2));
    base + Duration::from_millis(jitter_ms)
}

fn is_write_conflict(error: &::duckdb::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("conflict") || message.contains("duplicate key")
}

/// Resolve the heliocache home directory from environment or default.
fn resolve_heliocache_home() -> PathBuf {
    if let Some(path) = env::var_os("HELIOCACHE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".heliocache");
    }

    PathBuf::from(".heliocache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const NOW: i64 = 1_760_000_000;

    fn open(temp: &tempfile::TempDir) -> Warehouse {
        Warehouse::open(WarehouseConfig::in_home(temp.path())).expect("warehouse open")
    }

    fn record(latitude: f64, longitude: f64, payload: &str) -> LocationRecord {
        LocationRecord {
            latitude,
            longitude,
            model_json: payload.to_owned(),
            source_dataset: String::from("PVGIS"),
            data_tier: String::from("engineering"),
            country_code: None,
            ttl_days: 30,
        }
    }

    #[test]
    fn initializes_cached_locations_table() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);

        let connection = warehouse.manager.acquire().expect("connection");
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'cached_locations'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(count, 1);
        assert_eq!(warehouse.proximity_mode(), ProximityMode::Geodesic);
    }

    #[test]
    fn reopening_does_not_reapply_migrations() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        warehouse
            .upsert_location(&record(1.0, 2.0, "{}"), NOW)
            .expect("upsert");
        drop(warehouse);

        let reopened = open(&temp);
        let stats = reopened.stats(NOW).expect("stats");
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn upsert_on_same_coordinate_keeps_one_row_and_latest_payload() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);

        let first = warehouse
            .upsert_location(&record(-33.45, -70.65, r#"{"v":1}"#), NOW)
            .expect("first upsert");
        let second = warehouse
            .upsert_location(&record(-33.45, -70.65, r#"{"v":2}"#), NOW + 60)
            .expect("second upsert");

        assert_eq!(first, second);
        let stored = warehouse.find_by_id(first).expect("lookup").expect("row");
        assert_eq!(stored.model_json, r#"{"v":2}"#);
        assert_eq!(stored.created_at, NOW + 60);
        assert_eq!(warehouse.stats(NOW).expect("stats").total_entries, 1);
    }

    #[test]
    fn concurrent_writers_on_one_coordinate_converge_to_a_single_row() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);

        let failures: usize = thread::scope(|scope| {
            let writers: Vec<_> = (0..16)
                .map(|writer| {
                    let warehouse = &warehouse;
                    scope.spawn(move || {
                        (0..20)
                            .filter(|round| {
                                let payload = format!(r#"{{"writer":{writer},"round":{round}}}"#);
                                warehouse
                                    .upsert_location(&record(-33.45, -70.65, &payload), NOW + round)
                                    .is_err()
                            })
                            .count()
                    })
                })
                .collect();
            writers
                .into_iter()
                .map(|writer| writer.join().expect("writer thread"))
                .sum()
        });

        assert_eq!(failures, 0);
        assert_eq!(warehouse.stats(NOW).expect("stats").total_entries, 1);

        let last = warehouse
            .upsert_location(&record(-33.45, -70.65, r#"{"final":true}"#), NOW + 100)
            .expect("final upsert");
        let stored = warehouse.find_by_id(last).expect("lookup").expect("row");
        assert_eq!(stored.model_json, r#"{"final":true}"#);
    }

    #[test]
    fn write_backoff_grows_and_stays_capped() {
        assert!(write_backoff(1) >= WRITE_BACKOFF_BASE);
        assert!(write_backoff(1) <= WRITE_BACKOFF_BASE + WRITE_BACKOFF_BASE / 2);
        assert!(write_backoff(3) >= WRITE_BACKOFF_BASE * 4);
        for attempt in 1..=MAX_WRITE_ATTEMPTS + 20 {
            assert!(write_backoff(attempt) <= WRITE_BACKOFF_CAP + WRITE_BACKOFF_CAP / 2);
        }
    }

    #[test]
    fn nearest_prefers_the_closest_row() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        let far = warehouse
            .upsert_location(&record(-33.47, -70.67, "far"), NOW)
            .expect("far");
        let near = warehouse
            .upsert_location(&record(-33.445, -70.645, "near"), NOW)
            .expect("near");

        let hit = warehouse
            .find_nearest(-33.44, -70.64, 5.0, NOW)
            .expect("query")
            .expect("hit");
        assert_eq!(hit.location.id, near);
        assert_ne!(hit.location.id, far);
        let expected = haversine_km(-33.44, -70.64, -33.445, -70.645);
        assert!((hit.distance_km - expected).abs() < 1e-6);
    }

    #[test]
    fn nearest_ignores_rows_outside_radius() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        warehouse
            .upsert_location(&record(-33.0, -70.0, "{}"), NOW)
            .expect("upsert");

        let miss = warehouse
            .find_nearest(-33.45, -70.65, 5.0, NOW)
            .expect("query");
        assert!(miss.is_none());
    }

    #[test]
    fn bounding_box_mode_finds_the_same_neighbour() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        let id = warehouse
            .upsert_location(&record(-33.45, -70.65, "{}"), NOW)
            .expect("upsert");

        let hit = warehouse
            .find_nearest_with(ProximityMode::BoundingBox, -33.44, -70.64, 5.0, NOW)
            .expect("query")
            .expect("hit");
        assert_eq!(hit.location.id, id);
        let expected = equirectangular_km(-33.44, -70.64, -33.45, -70.65);
        assert!((hit.distance_km - expected).abs() < 1e-6);
    }

    #[test]
    fn geodesic_mode_matches_across_the_antimeridian() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        let id = warehouse
            .upsert_location(&record(-16.5, 179.99, "{}"), NOW)
            .expect("upsert");

        let hit = warehouse
            .find_nearest(-16.5, -179.99, 5.0, NOW)
            .expect("query")
            .expect("hit");
        assert_eq!(hit.location.id, id);
        assert!(hit.distance_km < 3.0);
    }

    #[test]
    fn expired_rows_are_hidden_then_swept() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        warehouse
            .upsert_location(&record(10.0, 10.0, "{}"), NOW)
            .expect("upsert");
        let later = NOW + 31 * SECONDS_PER_DAY;

        assert!(warehouse
            .find_nearest(10.0, 10.0, 1.0, later)
            .expect("query")
            .is_none());

        let dry = warehouse.sweep(later, true).expect("dry run");
        assert_eq!(dry.expired, 1);
        assert_eq!(warehouse.stats(later).expect("stats").total_entries, 1);

        assert_eq!(warehouse.delete_expired(later).expect("sweep"), 1);
        assert_eq!(warehouse.stats(later).expect("stats").total_entries, 0);
    }

    #[test]
    fn stats_group_by_source_and_tier() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        warehouse
            .upsert_location(&record(1.0, 1.0, "{}"), NOW)
            .expect("a");
        let mut cams = record(2.0, 2.0, "{}");
        cams.source_dataset = String::from("CAMS");
        cams.data_tier = String::from("standard");
        cams.ttl_days = 1;
        warehouse.upsert_location(&cams, NOW - 2 * SECONDS_PER_DAY).expect("b");

        let stats = warehouse.stats(NOW).expect("stats");
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.by_source.get("PVGIS"), Some(&1));
        assert_eq!(stats.by_source.get("CAMS"), Some(&1));
        assert_eq!(stats.by_tier.get("engineering"), Some(&1));
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.oldest_entry, Some(NOW - 2 * SECONDS_PER_DAY));
        assert_eq!(stats.newest_entry, Some(NOW));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);

        let error = warehouse
            .upsert_location(&record(91.0, 0.0, "{}"), NOW)
            .expect_err("should reject");
        assert!(matches!(error, WarehouseError::InvalidRecord(_)));
    }

    #[test]
    fn proximity_mode_parses_aliases() {
        assert_eq!("bbox".parse::<ProximityMode>().ok(), Some(ProximityMode::BoundingBox));
        assert_eq!(" Geodesic ".parse::<ProximityMode>().ok(), Some(ProximityMode::Geodesic));
        assert!("nearest".parse::<ProximityMode>().is_err());
    }
}
