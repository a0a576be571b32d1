use serde_json::json;

use crate::cli::CacheCommand;
use crate::error::CliError;

use super::{CommandResult, Runtime};

pub async fn run(command: &CacheCommand, runtime: Runtime) -> Result<CommandResult, CliError> {
    let orchestrator = runtime.into_orchestrator().await?;

    match command {
        CacheCommand::Stats => {
            let stats = orchestrator.get_stats().await?;
            Ok(CommandResult::ok(serde_json::to_value(stats)?))
        }
        CacheCommand::Sweep { dry_run } => {
            let report = orchestrator.sweep(*dry_run).await?;
            Ok(CommandResult::ok(serde_json::to_value(report)?))
        }
        CacheCommand::Invalidate(coordinate) => {
            let removed = orchestrator
                .invalidate(coordinate.lat, coordinate.lon)
                .await?;
            // The hot tier lives in process memory, so a fresh CLI run rarely
            // has anything to remove.
            let warnings = if removed {
                Vec::new()
            } else {
                vec![String::from("no hot-tier entry for this coordinate")]
            };
            Ok(CommandResult::ok(json!({
                "latitude": coordinate.lat,
                "longitude": coordinate.lon,
                "removed": removed,
            }))
            .with_warnings(warnings))
        }
    }
}
