use heliocache_core::CacheEntry;
use serde::Serialize;

use crate::cli::NearbyArgs;
use crate::error::CliError;

use super::{CommandResult, Runtime};

#[derive(Debug, Serialize)]
struct NearbyResponse {
    latitude: f64,
    longitude: f64,
    radius_km: f64,
    found: bool,
    entry: Option<CacheEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimal_annual_kwh: Option<f64>,
}

pub async fn run(args: &NearbyArgs, runtime: Runtime) -> Result<CommandResult, CliError> {
    let radius_km = args.radius_km.unwrap_or(runtime.config().cache.radius_km);
    let orchestrator = runtime.into_orchestrator().await?;
    let entry = orchestrator
        .find_nearby(args.coordinate.lat, args.coordinate.lon, radius_km)
        .await?;

    let response = NearbyResponse {
        latitude: args.coordinate.lat,
        longitude: args.coordinate.lon,
        radius_km,
        found: entry.is_some(),
        optimal_annual_kwh: entry.as_ref().map(|entry| entry.model.optimal_annual_kwh),
        entry,
    };
    Ok(CommandResult::ok(serde_json::to_value(response)?))
}
