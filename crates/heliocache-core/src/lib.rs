//! # Heliocache Core
//!
//! Resilient acquisition and layered caching of solar radiation models.
//!
//! ## Overview
//!
//! Estimating what a solar installation generates at a coordinate needs one
//! year of monthly irradiance from an external provider. Those calls are
//! slow, metered and unreliable, so this crate puts three things between a
//! request and the providers:
//!
//! - **Admission control** per provider: circuit breaker, sliding-window
//!   rate limiter and concurrency limiter, always in that order
//! - **Racing fetch** across every provider, first valid answer wins, with
//!   deterministic synthetic data when nothing answers in time
//! - **Layered cache**: an exact-match hot tier and a proximity-searchable
//!   warm tier holding precomputed [`InterpolationModel`] grids
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | PVGIS and CAMS provider adapters |
//! | [`admission`] | Per-provider guard composition and registry |
//! | [`cache`] | Hot-tier trait and in-memory store |
//! | [`circuit_breaker`] | Closed / Open / HalfOpen breaker |
//! | [`clock`] | Injectable wall clock for TTL decisions |
//! | [`concurrency`] | Scoped concurrency limiter |
//! | [`config`] | `HELIOCACHE_*` environment configuration |
//! | [`data_source`] | Provider trait and radiation-data shape |
//! | [`error`] | Validation and cache-backend errors |
//! | [`http_client`] | HTTP transport seam |
//! | [`interpolation`] | Tilt × orientation × month generation grid |
//! | [`logging`] | Tracing subscriber bootstrap |
//! | [`metrics`] | Cache hit/miss counters |
//! | [`orchestrator`] | Hot → warm → fetch lookup |
//! | [`provider_policy`] | Per-provider limits |
//! | [`racing`] | First-valid-wins fetcher |
//! | [`retry`] | Backoff for transient HTTP failures |
//! | [`source`] | Provider identifiers and data tiers |
//! | [`synthetic`] | Deterministic fallback data |
//! | [`throttling`] | Sliding-window rate limiter |
//! | [`warm`] | Warm-tier trait and DuckDB bridge |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  get_or_create_model │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐   hit   ┌──────────────────┐
//! │  Hot tier (exact)    │────────▶│ rescale to area  │
//! └──────────┬───────────┘         └──────────────────┘
//!            │ miss                          ▲
//!            ▼                               │ hit, back-fill hot
//! ┌──────────────────────┐                   │
//! │  Warm tier (nearby)  │───────────────────┘
//! └──────────┬───────────┘
//!            │ miss
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────────────────┐
//! │  Source racer        │────▶│ breaker → limiter → permits  │
//! └──────────┬───────────┘     │ PVGIS adapter / CAMS adapter │
//!            │                 └──────────────────────────────┘
//!            ▼
//! ┌──────────────────────┐
//! │  Build model, write  │
//! │  hot + warm tiers    │
//! └──────────────────────┘
//! ```

pub mod adapters;
pub mod admission;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod data_source;
pub mod error;
pub mod http_client;
pub mod interpolation;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod provider_policy;
pub mod racing;
pub mod retry;
pub mod source;
pub mod synthetic;
pub mod throttling;
pub mod warm;

pub use adapters::{CamsAdapter, CamsSettings, PvgisAdapter, PvgisDatabase};
pub use admission::{AdmissionMode, AdmissionRegistry, AdmissionSnapshot, ProviderGuard};
pub use cache::{hot_key, HotStore, MemoryHotStore};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState, CircuitStatus,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit, ConcurrencyStatus};
pub use config::{ConfigError, HelioConfig};
pub use data_source::{
    previous_year, RadiationData, RadiationRequest, RadiationSource, SourceError,
    SourceErrorKind, MONTH_NAMES,
};
pub use error::{
    validate_coordinates, CacheBackendError, CircuitOpenError, CoreError, ValidationError,
};
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use interpolation::{
    GenerationEstimate, InterpolationModel, MonthlyGeneration, DEFAULT_AREA_M2,
    DEFAULT_PANEL_EFFICIENCY,
};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use orchestrator::{CacheLayer, CacheOrchestrator, CacheSettings, CacheStats, ResolvedModel};
pub use provider_policy::ProviderPolicy;
pub use racing::{FetchOutcome, ProviderFailure, RaceFailure, RaceSuccess, SourceRacer};
pub use retry::{Backoff, RetryPolicy};
pub use source::{DataTier, ProviderId};
pub use synthetic::{SyntheticGenerator, SYNTHETIC_LABEL};
pub use throttling::{RateLimiter, RateLimiterConfig, RateLimiterStatus};
pub use warm::{CacheEntry, DuckDbWarmStore, NewCacheEntry, WarmStore};
