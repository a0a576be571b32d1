use heliocache_core::{AdmissionSnapshot, ProviderId};
use serde::Serialize;

use crate::error::CliError;

use super::{CommandResult, Runtime};

#[derive(Debug, Serialize)]
struct SourceRow {
    provider: ProviderId,
    configured: bool,
    admission: AdmissionSnapshot,
}

#[derive(Debug, Serialize)]
struct SourcesResponse {
    race_timeout_seconds: u64,
    sources: Vec<SourceRow>,
}

pub fn run(runtime: &Runtime) -> Result<CommandResult, CliError> {
    let mut warnings = Vec::new();
    let sources = runtime
        .registry()
        .snapshots()
        .into_iter()
        .map(|admission| {
            let configured = match admission.provider {
                ProviderId::Cams => runtime.cams_configured(),
                ProviderId::Pvgis => true,
            };
            if !configured {
                warnings.push(format!(
                    "{}: no API key set; answers are placeholders and never win a race",
                    admission.provider
                ));
            }
            SourceRow {
                provider: admission.provider,
                configured,
                admission,
            }
        })
        .collect();

    let response = SourcesResponse {
        race_timeout_seconds: runtime.config().race_timeout.as_secs(),
        sources,
    };
    Ok(CommandResult::ok(serde_json::to_value(response)?).with_warnings(warnings))
}
