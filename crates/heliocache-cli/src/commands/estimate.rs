use heliocache_core::{CacheLayer, DataTier, ProviderFailure, SYNTHETIC_LABEL};
use serde::Serialize;

use crate::cli::EstimateArgs;
use crate::error::CliError;

use super::{CommandResult, Runtime};

#[derive(Debug, Serialize)]
struct EstimateResponse {
    latitude: f64,
    longitude: f64,
    area_m2: f64,
    panel_efficiency: f64,
    data_tier: DataTier,
    source_label: String,
    year: i32,
    cache: CacheLayer,
    estimate: heliocache_core::GenerationEstimate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    provider_failures: Vec<ProviderFailure>,
}

pub async fn run(args: &EstimateArgs, runtime: Runtime) -> Result<CommandResult, CliError> {
    let orchestrator = runtime.into_orchestrator().await?;
    let resolved = orchestrator
        .resolve(
            args.coordinate.lat,
            args.coordinate.lon,
            args.area,
            args.efficiency,
        )
        .await?;

    let model = resolved.model;
    let estimate = model.interpolate(
        args.tilt.unwrap_or(model.optimal_tilt),
        args.orientation.unwrap_or(model.optimal_orientation),
    )?;

    let mut warnings: Vec<String> = resolved
        .failures
        .iter()
        .map(|failure| format!("{}: {} ({})", failure.provider, failure.message, failure.code))
        .collect();
    if model.data_tier == DataTier::Estimated {
        warnings.push(format!(
            "no provider answered; values come from '{SYNTHETIC_LABEL}' estimates"
        ));
    }

    let response = EstimateResponse {
        latitude: args.coordinate.lat,
        longitude: args.coordinate.lon,
        area_m2: model.area_m2,
        panel_efficiency: model.panel_efficiency,
        data_tier: model.data_tier,
        source_label: model.source_label.clone(),
        year: model.year,
        cache: resolved.layer,
        estimate,
        provider_failures: resolved.failures,
    };

    Ok(CommandResult::ok(serde_json::to_value(response)?).with_warnings(warnings))
}
