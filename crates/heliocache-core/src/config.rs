//! Runtime configuration from `HELIOCACHE_*` environment variables.
//!
//! Every setting has a default, so an empty environment yields a working
//! configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use heliocache_warehouse::{ProximityMode, WarehouseConfig};
use thiserror::Error;

use crate::orchestrator::{CacheSettings, DEFAULT_HOT_TTL, DEFAULT_RADIUS_KM};
use crate::provider_policy::ProviderPolicy;
use crate::racing::DEFAULT_RACE_TIMEOUT;
use crate::warm::DEFAULT_WARM_TTL_DAYS;
use crate::ProviderId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value '{value}' for {name}: {reason}")]
pub struct ConfigError {
    pub name: String,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct HelioConfig {
    pub home: PathBuf,
    pub warehouse: WarehouseConfig,
    pub cache: CacheSettings,
    pub warm_ttl_days: u32,
    pub race_timeout: Duration,
    pub cams: ProviderPolicy,
    pub pvgis: ProviderPolicy,
    pub cams_api_key: Option<String>,
}

impl HelioConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let home = vars
            .get("HELIOCACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| vars.get("HOME").map(|home| PathBuf::from(home).join(".heliocache")))
            .unwrap_or_else(|| PathBuf::from(".heliocache"));

        let mut warehouse = WarehouseConfig::in_home(&home);
        if let Some(mode) = vars.get("HELIOCACHE_PROXIMITY_MODE") {
            warehouse.proximity_mode =
                ProximityMode::from_str(&mode).map_err(|error| ConfigError {
                    name: String::from("HELIOCACHE_PROXIMITY_MODE"),
                    value: mode.clone(),
                    reason: error.to_string(),
                })?;
        }

        let radius_km: f64 = vars.parse_or("HELIOCACHE_RADIUS_KM", DEFAULT_RADIUS_KM)?;
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(ConfigError {
                name: String::from("HELIOCACHE_RADIUS_KM"),
                value: radius_km.to_string(),
                reason: String::from("must be a positive number"),
            });
        }

        let cache = CacheSettings {
            hot_ttl: Duration::from_secs(
                vars.parse_or("HELIOCACHE_HOT_TTL_SECONDS", DEFAULT_HOT_TTL.as_secs())?,
            ),
            radius_km,
            year: vars.parse_opt("HELIOCACHE_YEAR")?,
        };

        Ok(Self {
            warehouse,
            cache,
            warm_ttl_days: vars.parse_or("HELIOCACHE_WARM_TTL_DAYS", DEFAULT_WARM_TTL_DAYS)?,
            race_timeout: Duration::from_secs(
                vars.parse_or("HELIOCACHE_RACE_TIMEOUT_SECONDS", DEFAULT_RACE_TIMEOUT.as_secs())?,
            ),
            cams: provider_policy(&vars, ProviderId::Cams)?,
            pvgis: provider_policy(&vars, ProviderId::Pvgis)?,
            cams_api_key: vars
                .get("HELIOCACHE_CAMS_API_KEY")
                .or_else(|| vars.get("CAMS_API_KEY")),
            home,
        })
    }

    pub fn policies(&self) -> [ProviderPolicy; 2] {
        [self.cams.clone(), self.pvgis.clone()]
    }
}

/// Provider preset with `HELIOCACHE_*_{CAMS,PVGIS}` overrides applied.
fn provider_policy<F>(vars: &Vars<F>, provider: ProviderId) -> Result<ProviderPolicy, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let suffix = provider.as_str().to_ascii_uppercase();
    let mut policy = ProviderPolicy::default_for(provider);

    policy.circuit.failure_threshold = vars.parse_or(
        &format!("HELIOCACHE_CIRCUIT_THRESHOLD_{suffix}"),
        policy.circuit.failure_threshold,
    )?;
    policy.circuit.recovery_timeout = Duration::from_secs(vars.parse_or(
        &format!("HELIOCACHE_CIRCUIT_RECOVERY_SECONDS_{suffix}"),
        policy.circuit.recovery_timeout.as_secs(),
    )?);
    policy.circuit.half_open_max_calls = vars.parse_or(
        &format!("HELIOCACHE_CIRCUIT_HALF_OPEN_CALLS_{suffix}"),
        policy.circuit.half_open_max_calls,
    )?;
    policy.rate_limit.max_calls = vars.parse_or(
        &format!("HELIOCACHE_RATE_LIMIT_{suffix}"),
        policy.rate_limit.max_calls,
    )?;
    policy.max_concurrency = vars.parse_or(
        &format!("HELIOCACHE_MAX_CONCURRENT_{suffix}"),
        policy.max_concurrency,
    )?;
    Ok(policy)
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn parse_opt<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|error| ConfigError {
                    name: name.to_owned(),
                    value: raw.clone(),
                    reason: error.to_string(),
                })
            })
            .transpose()
    }

    fn parse_or<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(name)?.unwrap_or(default))
    }
}
