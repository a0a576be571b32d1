//! Command dispatch and the composition root.
//!
//! Provider guards are built once per process and shared between the
//! adapters that use them and the registry that reports on them.

mod cache;
mod estimate;
mod nearby;
mod sources;

use std::sync::Arc;
use std::time::Instant;

use heliocache_core::{
    AdmissionRegistry, CacheOrchestrator, CamsAdapter, CamsSettings, DuckDbWarmStore,
    HelioConfig, HttpClient, MemoryHotStore, ProviderGuard, PvgisAdapter, RadiationSource,
    ReqwestHttpClient, SourceRacer, SystemClock,
};
use heliocache_warehouse::Warehouse;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::{Envelope, Meta, RequestId};

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Everything a command needs, minus the warehouse, which only the cache
/// commands open.
pub struct Runtime {
    config: HelioConfig,
    registry: AdmissionRegistry,
    cams_configured: bool,
    racer: SourceRacer,
}

impl Runtime {
    pub fn from_config(config: HelioConfig) -> Self {
        let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let cams_guard = Arc::new(ProviderGuard::from_policy(&config.cams));
        let pvgis_guard = Arc::new(ProviderGuard::from_policy(&config.pvgis));

        let mut registry = AdmissionRegistry::default();
        registry.insert(Arc::clone(&cams_guard));
        registry.insert(Arc::clone(&pvgis_guard));

        let mut cams_settings = CamsSettings::default();
        if let Some(api_key) = &config.cams_api_key {
            cams_settings = cams_settings.with_api_key(api_key.as_str());
        }
        let cams = CamsAdapter::new(Arc::clone(&http_client), cams_guard, cams_settings)
            .with_retry(config.cams.retry.clone());
        let cams_configured = cams.is_configured();
        let pvgis = PvgisAdapter::new(Arc::clone(&http_client), pvgis_guard)
            .with_retry(config.pvgis.retry.clone());

        let sources: Vec<Arc<dyn RadiationSource>> = vec![Arc::new(pvgis), Arc::new(cams)];
        let racer = SourceRacer::new(sources).with_timeout(config.race_timeout);

        Self {
            config,
            registry,
            cams_configured,
            racer,
        }
    }

    pub fn registry(&self) -> &AdmissionRegistry {
        &self.registry
    }

    pub fn cams_configured(&self) -> bool {
        self.cams_configured
    }

    pub fn config(&self) -> &HelioConfig {
        &self.config
    }

    /// Open the warm tier and assemble the orchestrator.
    pub async fn into_orchestrator(self) -> Result<CacheOrchestrator, CliError> {
        let warehouse_config = self.config.warehouse.clone();
        let warehouse = tokio::task::spawn_blocking(move || Warehouse::open(warehouse_config))
            .await
            .map_err(|error| CliError::Command(error.to_string()))?
            .map_err(|error| CliError::Command(error.to_string()))?;
        debug!(db_path = %warehouse.db_path().display(), "warm tier opened");

        let warm = DuckDbWarmStore::new(
            warehouse,
            Arc::new(SystemClock),
            self.config.warm_ttl_days,
        );

        Ok(CacheOrchestrator::new(
            Arc::new(MemoryHotStore::new()),
            Arc::new(warm),
            self.racer,
            self.registry,
            self.config.cache,
        ))
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let started = Instant::now();
    let request_id = RequestId::new_v4();
    let runtime = Runtime::from_config(HelioConfig::from_env()?);

    let outcome: Result<(&'static str, CommandResult), CliError> = async {
        match &cli.command {
            Command::Estimate(args) => Ok(("estimate", estimate::run(args, runtime).await?)),
            Command::Nearby(args) => Ok(("nearby", nearby::run(args, runtime).await?)),
            Command::Cache(args) => Ok(("cache", cache::run(&args.command, runtime).await?)),
            Command::Sources => Ok(("sources", sources::run(&runtime)?)),
        }
    }
    .instrument(info_span!("command", request_id = %request_id))
    .await;
    let (command, result) = outcome?;

    Ok(Envelope {
        meta: Meta {
            request_id,
            command,
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            warnings: result.warnings,
        },
        data: result.data,
    })
}
