//! Copernicus Atmosphere Data Store adapter for the CAMS solar radiation
//! time series.
//!
//! The ADS answers asynchronously: the adapter submits a job, polls it until
//! it succeeds, resolves the result asset and downloads an hourly CSV which
//! is folded into monthly totals here.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapters::{send_with_retry, status_error};
use crate::admission::ProviderGuard;
use crate::data_source::{
    RadiationData, RadiationRequest, RadiationSource, SourceError, MONTH_NAMES,
};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::provider_policy::ProviderPolicy;
use crate::retry::RetryPolicy;
use crate::synthetic::SyntheticGenerator;
use crate::{DataTier, ProviderId};

pub const CAMS_BASE_URL: &str = "https://ads.atmosphere.copernicus.eu/api";
const PROCESS_ID: &str = "cams-solar-radiation-timeseries";
pub const CAMS_REAL_LABEL: &str = "CAMS Solar Radiation Timeseries (Real Data)";
pub const CAMS_MOCK_LABEL: &str = "CAMS Solar Radiation Timeseries (Mock Data)";

/// Satellite coverage of the CAMS radiation service.
pub const CAMS_MAX_ABS_LATITUDE: f64 = 66.0;
/// Above this latitude the satellite view is oblique enough to downgrade the tier.
const ENGINEERING_MAX_ABS_LATITUDE: f64 = 60.0;

const GHI_COLUMN: usize = 6;
const MIN_COLUMNS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct CamsSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for CamsSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: String::from(CAMS_BASE_URL),
            poll_interval: Duration::from_secs(2),
            max_polls: 60,
        }
    }
}

impl CamsSettings {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then_some(api_key);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Clone)]
pub struct CamsAdapter {
    http_client: Arc<dyn HttpClient>,
    guard: Arc<ProviderGuard>,
    retry: RetryPolicy,
    timeout: Duration,
    settings: CamsSettings,
}

impl CamsAdapter {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        guard: Arc<ProviderGuard>,
        settings: CamsSettings,
    ) -> Self {
        let policy = ProviderPolicy::cams_default();
        Self {
            http_client,
            guard,
            retry: policy.retry,
            timeout: policy.request_timeout,
            settings,
        }
    }

    pub fn from_policy(
        http_client: Arc<dyn HttpClient>,
        policy: &ProviderPolicy,
        settings: CamsSettings,
    ) -> Self {
        Self {
            retry: policy.retry.clone(),
            timeout: policy.request_timeout,
            ..Self::new(
                http_client,
                Arc::new(ProviderGuard::from_policy(policy)),
                settings,
            )
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn guard(&self) -> &Arc<ProviderGuard> {
        &self.guard
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_configured()
    }

    async fn fetch_inner(&self, request: RadiationRequest) -> Result<RadiationData, SourceError> {
        if request.latitude.abs() > CAMS_MAX_ABS_LATITUDE {
            return Err(SourceError::out_of_coverage(format!(
                "latitude {} is outside CAMS coverage [-{CAMS_MAX_ABS_LATITUDE}, {CAMS_MAX_ABS_LATITUDE}]",
                request.latitude
            )));
        }

        let Some(api_key) = self.settings.api_key.as_deref() else {
            warn!("CAMS API key is not configured; answering with placeholder data");
            return Ok(SyntheticGenerator::labelled(CAMS_MOCK_LABEL).generate(
                request.latitude,
                request.longitude,
                request.year,
            ));
        };

        self.guard
            .run(|| self.fetch_from_ads(request, api_key))
            .await
    }

    async fn fetch_from_ads(
        &self,
        request: RadiationRequest,
        api_key: &str,
    ) -> Result<RadiationData, SourceError> {
        let job_id = self.submit_job(request, api_key).await?;
        info!(job_id = %job_id, latitude = request.latitude, longitude = request.longitude, "submitted CAMS job");

        self.wait_for_job(&job_id, api_key).await?;
        let href = self.resolve_asset(&job_id, api_key).await?;
        let csv = self.send(HttpRequest::get(href), api_key).await?;

        let monthly_irradiance = parse_monthly_ghi(&csv.body)?;
        let data_tier = if request.latitude.abs() <= ENGINEERING_MAX_ABS_LATITUDE {
            DataTier::Engineering
        } else {
            DataTier::Standard
        };

        Ok(RadiationData {
            latitude: request.latitude,
            longitude: request.longitude,
            year: request.year,
            monthly_irradiance,
            data_tier,
            source_label: String::from(CAMS_REAL_LABEL),
            synthetic: false,
            elevation_m: None,
        })
    }

    async fn submit_job(
        &self,
        request: RadiationRequest,
        api_key: &str,
    ) -> Result<String, SourceError> {
        let year = request.year;
        let body = json!({
            "inputs": {
                "sky_type": "observed_cloud",
                "location": {
                    "longitude": round5(request.longitude),
                    "latitude": round5(request.latitude),
                },
                "altitude": ["-999."],
                "date": [format!("{year}-01-01/{year}-12-31")],
                "time_step": "1hour",
                "time_reference": "universal_time",
                "data_format": "csv",
            }
        });
        let url = format!(
            "{}/retrieve/v1/processes/{PROCESS_ID}/execution",
            self.settings.base_url
        );

        let response = self
            .send(HttpRequest::post_json(url, body.to_string()), api_key)
            .await?;
        let submitted: JobStatus = parse_json(&response, "job submission")?;
        Ok(submitted.job_id)
    }

    async fn wait_for_job(&self, job_id: &str, api_key: &str) -> Result<(), SourceError> {
        let url = format!("{}/retrieve/v1/jobs/{job_id}", self.settings.base_url);
        for poll in 0..self.settings.max_polls {
            let response = self.send(HttpRequest::get(&url), api_key).await?;
            let status: JobStatus = parse_json(&response, "job status")?;
            let state = status.status.unwrap_or_default();
            match state.as_str() {
                "successful" => return Ok(()),
                "failed" | "dismissed" => {
                    return Err(SourceError::unavailable(format!(
                        "CAMS job {job_id} ended with status '{state}'"
                    )));
                }
                _ => debug!(job_id, poll, status = %state, "CAMS job still running"),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        Err(SourceError::timeout(format!(
            "CAMS job {job_id} did not finish after {} polls",
            self.settings.max_polls
        )))
    }

    async fn resolve_asset(&self, job_id: &str, api_key: &str) -> Result<String, SourceError> {
        let url = format!("{}/retrieve/v1/jobs/{job_id}/results", self.settings.base_url);
        let response = self.send(HttpRequest::get(url), api_key).await?;
        let results: JobResults = parse_json(&response, "job results")?;
        Ok(results.asset.value.href)
    }

    async fn send(&self, request: HttpRequest, api_key: &str) -> Result<HttpResponse, SourceError> {
        let request = request
            .with_header("PRIVATE-TOKEN", api_key)
            .with_timeout(self.timeout);
        let response =
            send_with_retry(self.http_client.as_ref(), request, &self.retry, ProviderId::Cams)
                .await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(status_error(ProviderId::Cams, &response))
        }
    }
}

impl RadiationSource for CamsAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Cams
    }

    fn fetch<'a>(
        &'a self,
        request: RadiationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RadiationData, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch_inner(request))
    }
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    asset: JobAsset,
}

#[derive(Debug, Deserialize)]
struct JobAsset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
}

fn parse_json<T: for<'de> Deserialize<'de>>(
    response: &HttpResponse,
    what: &str,
) -> Result<T, SourceError> {
    serde_json::from_str(&response.body).map_err(|error| {
        SourceError::invalid_response(format!("failed to parse CAMS {what}: {error}"))
    })
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Fold the hourly CSV into monthly GHI totals in kWh/m².
///
/// Rows are `;` separated with the `start/end` period first and GHI in Wh/m²
/// in the seventh column. Short or malformed rows are skipped.
fn parse_monthly_ghi(csv: &str) -> Result<[f64; 12], SourceError> {
    let mut totals = [0.0; 12];
    let mut seen = [false; 12];

    for line in csv.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let columns: Vec<&str> = line.split(';').collect();
        if columns.len() < MIN_COLUMNS {
            continue;
        }

        let start = columns[0].split('/').next().unwrap_or_default();
        let Some(month) = start
            .get(5..7)
            .and_then(|month| month.parse::<usize>().ok())
            .filter(|month| (1..=12).contains(month))
        else {
            continue;
        };

        let raw = columns[GHI_COLUMN].trim();
        let ghi = if raw.eq_ignore_ascii_case("nan") {
            0.0
        } else {
            match raw.parse::<f64>() {
                Ok(value) => value,
                Err(_) => continue,
            }
        };

        totals[month - 1] += ghi;
        seen[month - 1] = true;
    }

    if let Some(missing) = seen.iter().position(|seen| !seen) {
        return Err(SourceError::invalid_response(format!(
            "CAMS time series has no rows for {}",
            MONTH_NAMES[missing]
        )));
    }

    Ok(totals.map(|wh| wh / 1000.0))
}
