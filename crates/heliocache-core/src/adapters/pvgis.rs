use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::adapters::{send_with_retry, status_error};
use crate::admission::ProviderGuard;
use crate::data_source::{
    RadiationData, RadiationRequest, RadiationSource, SourceError, SourceErrorKind, MONTH_NAMES,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::retry::RetryPolicy;
use crate::{DataTier, ProviderId};

pub const PVGIS_BASE_URL: &str = "https://re.jrc.ec.europa.eu/api/v5_2/PVcalc";

/// Radiation databases offered by PVGIS, chosen by region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PvgisDatabase {
    Sarah2,
    Nsrdb,
    Era5,
}

impl PvgisDatabase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sarah2 => "PVGIS-SARAH2",
            Self::Nsrdb => "PVGIS-NSRDB",
            Self::Era5 => "PVGIS-ERA5",
        }
    }

    /// Satellite databases where they exist, the ERA5 reanalysis elsewhere.
    pub fn select(latitude: f64, longitude: f64) -> Self {
        if -170.0 < longitude && longitude < -30.0 {
            Self::Nsrdb
        } else if -30.0 < longitude && longitude < 60.0 && -35.0 < latitude && latitude < 70.0 {
            Self::Sarah2
        } else {
            Self::Era5
        }
    }

    pub const fn data_tier(self) -> DataTier {
        match self {
            Self::Sarah2 | Self::Nsrdb => DataTier::Engineering,
            Self::Era5 => DataTier::Standard,
        }
    }
}

/// EU JRC PVGIS adapter.
#[derive(Clone)]
pub struct PvgisAdapter {
    http_client: Arc<dyn HttpClient>,
    guard: Arc<ProviderGuard>,
    retry: RetryPolicy,
    base_url: String,
    timeout: Duration,
}

impl PvgisAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, guard: Arc<ProviderGuard>) -> Self {
        let policy = ProviderPolicy::pvgis_default();
        Self {
            http_client,
            guard,
            retry: policy.retry,
            base_url: String::from(PVGIS_BASE_URL),
            timeout: policy.request_timeout,
        }
    }

    /// Build the adapter and its guard from one policy.
    pub fn from_policy(http_client: Arc<dyn HttpClient>, policy: &ProviderPolicy) -> Self {
        Self {
            retry: policy.retry.clone(),
            timeout: policy.request_timeout,
            ..Self::new(http_client, Arc::new(ProviderGuard::from_policy(policy)))
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn guard(&self) -> &Arc<ProviderGuard> {
        &self.guard
    }

    async fn fetch_from_upstream(
        &self,
        request: RadiationRequest,
    ) -> Result<RadiationData, SourceError> {
        let database = PvgisDatabase::select(request.latitude, request.longitude);
        match self.fetch_database(request, database).await {
            Err(error) if database != PvgisDatabase::Era5 && is_status_failure(&error) => {
                info!(
                    database = database.as_str(),
                    error = %error,
                    "regional PVGIS database failed; retrying with ERA5"
                );
                self.fetch_database(request, PvgisDatabase::Era5).await
            }
            outcome => outcome,
        }
    }

    async fn fetch_database(
        &self,
        request: RadiationRequest,
        database: PvgisDatabase,
    ) -> Result<RadiationData, SourceError> {
        let latitude = format!("{:.4}", request.latitude);
        let longitude = format!("{:.4}", request.longitude);
        let http_request = HttpRequest::get(&self.base_url)
            .with_query([
                ("lat", latitude.as_str()),
                ("lon", longitude.as_str()),
                ("peakpower", "1"),
                ("loss", "14"),
                ("outputformat", "json"),
                ("raddatabase", database.as_str()),
                ("angle", "0"),
                ("aspect", "0"),
            ])
            .with_timeout(self.timeout);

        debug!(database = database.as_str(), url = %http_request.url, "requesting PVGIS");
        let response = send_with_retry(
            self.http_client.as_ref(),
            http_request,
            &self.retry,
            ProviderId::Pvgis,
        )
        .await?;
        if !response.is_success() {
            return Err(status_error(ProviderId::Pvgis, &response));
        }

        let payload: PvgisResponse = serde_json::from_str(&response.body).map_err(|error| {
            SourceError::invalid_response(format!("failed to parse PVGIS response: {error}"))
        })?;
        payload.into_radiation_data(request, database)
    }
}

/// Status failures are the ones the ERA5 fallback can plausibly fix.
fn is_status_failure(error: &SourceError) -> bool {
    matches!(
        error.kind(),
        SourceErrorKind::InvalidRequest | SourceErrorKind::Unavailable
    )
}

impl RadiationSource for PvgisAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Pvgis
    }

    fn fetch<'a>(
        &'a self,
        request: RadiationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RadiationData, SourceError>> + Send + 'a>> {
        Box::pin(async move { self.guard.run(|| self.fetch_from_upstream(request)).await })
    }
}

#[derive(Debug, Deserialize)]
struct PvgisResponse {
    inputs: Option<PvgisInputs>,
    outputs: PvgisOutputs,
}

#[derive(Debug, Deserialize)]
struct PvgisInputs {
    location: Option<PvgisLocation>,
    meteo_data: Option<PvgisMeteoData>,
}

#[derive(Debug, Deserialize)]
struct PvgisLocation {
    elevation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PvgisMeteoData {
    radiation_db: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PvgisOutputs {
    monthly: PvgisMonthly,
}

#[derive(Debug, Deserialize)]
struct PvgisMonthly {
    fixed: Vec<PvgisMonth>,
}

#[derive(Debug, Deserialize)]
struct PvgisMonth {
    month: u8,
    #[serde(rename = "H(i)_m")]
    irradiation: f64,
}

impl PvgisResponse {
    fn into_radiation_data(
        self,
        request: RadiationRequest,
        requested: PvgisDatabase,
    ) -> Result<RadiationData, SourceError> {
        let mut months: [Option<f64>; 12] = [None; 12];
        for entry in self.outputs.monthly.fixed {
            let slot = usize::from(entry.month)
                .checked_sub(1)
                .and_then(|index| months.get_mut(index))
                .ok_or_else(|| {
                    SourceError::invalid_response(format!(
                        "PVGIS returned unknown month {}",
                        entry.month
                    ))
                })?;
            *slot = Some(entry.irradiation);
        }

        let mut monthly_irradiance = [0.0; 12];
        for (index, value) in months.iter().enumerate() {
            monthly_irradiance[index] = value.ok_or_else(|| {
                SourceError::invalid_response(format!(
                    "PVGIS response is missing {}",
                    MONTH_NAMES[index]
                ))
            })?;
        }

        let (elevation_m, reported_db) = match self.inputs {
            Some(inputs) => (
                inputs.location.and_then(|location| location.elevation),
                inputs.meteo_data.and_then(|meteo| meteo.radiation_db),
            ),
            None => (None, None),
        };
        let database = reported_db.unwrap_or_else(|| String::from(requested.as_str()));

        Ok(RadiationData {
            latitude: request.latitude,
            longitude: request.longitude,
            year: request.year,
            monthly_irradiance,
            data_tier: requested.data_tier(),
            source_label: format!("PVGIS ({database})"),
            synthetic: false,
            elevation_m,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};

    fn pvgis_body(months: u8) -> String {
        let fixed: Vec<String> = (1..=months)
            .map(|month| format!(r#"{{"month": {month}, "H(i)_m": {}.5}}"#, 100 + u32::from(month)))
            .collect();
        format!(
            r#"{{
                "inputs": {{
                    "location": {{"latitude": -33.45, "longitude": -70.65, "elevation": 570.0}},
                    "meteo_data": {{"radiation_db": "PVGIS-NSRDB"}}
                }},
                "outputs": {{"monthly": {{"fixed": [{}]}}}}
            }}"#,
            fixed.join(",")
        )
    }

    fn adapter(client: Arc<ScriptedHttpClient>) -> PvgisAdapter {
        PvgisAdapter::from_policy(client, &ProviderPolicy::pvgis_default())
            .with_retry(RetryPolicy::none())
    }

    #[test]
    fn database_follows_region() {
        assert_eq!(PvgisDatabase::select(-33.45, -70.65), PvgisDatabase::Nsrdb);
        assert_eq!(PvgisDatabase::select(40.4, -3.7), PvgisDatabase::Sarah2);
        assert_eq!(PvgisDatabase::select(35.7, 139.7), PvgisDatabase::Era5);
        assert_eq!(PvgisDatabase::select(75.0, 10.0), PvgisDatabase::Era5);
    }

    #[tokio::test]
    async fn parses_monthly_irradiance_and_metadata() {
        let client = Arc::new(ScriptedHttpClient::new().respond("PVcalc", HttpResponse::ok(pvgis_body(12))));
        let request = RadiationRequest::new(-33.45, -70.65, 2024).expect("valid");

        let data = adapter(Arc::clone(&client)).fetch(request).await.expect("parsed");

        assert_eq!(data.monthly_irradiance[0], 101.5);
        assert_eq!(data.monthly_irradiance[11], 112.5);
        assert_eq!(data.data_tier, DataTier::Engineering);
        assert_eq!(data.source_label, "PVGIS (PVGIS-NSRDB)");
        assert_eq!(data.elevation_m, Some(570.0));

        let url = &client.requests()[0].url;
        assert!(url.contains("lat=-33.4500"));
        assert!(url.contains("raddatabase=PVGIS-NSRDB"));
    }

    #[tokio::test]
    async fn missing_months_are_an_invalid_response() {
        let client = Arc::new(ScriptedHttpClient::new().respond("PVcalc", HttpResponse::ok(pvgis_body(11))));
        let request = RadiationRequest::new(-33.45, -70.65, 2024).expect("valid");

        let error = adapter(client).fetch(request).await.expect_err("only 11 months");
        assert_eq!(error.kind(), SourceErrorKind::InvalidResponse);
        assert!(error.message().contains("Dec"));
    }

    #[tokio::test]
    async fn regional_database_failure_falls_back_to_era5() {
        let client = Arc::new(
            ScriptedHttpClient::new()
                .respond("PVGIS-SARAH2", HttpResponse::with_status(400, "location over sea"))
                .respond("PVGIS-ERA5", HttpResponse::ok(pvgis_body(12))),
        );
        let request = RadiationRequest::new(40.4, -3.7, 2024).expect("valid");

        let data = adapter(Arc::clone(&client)).fetch(request).await.expect("era5 answers");

        assert_eq!(data.data_tier, DataTier::Standard);
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn upstream_outage_counts_against_the_breaker() {
        let client = Arc::new(
            ScriptedHttpClient::new().respond("PVcalc", HttpResponse::with_status(503, "down")),
        );
        let adapter = adapter(client);
        let request = RadiationRequest::new(35.7, 139.7, 2024).expect("valid");

        let error = adapter.fetch(request).await.expect_err("outage");

        assert_eq!(error.kind(), SourceErrorKind::Unavailable);
        assert_eq!(adapter.guard().breaker().consecutive_failures(), 1);
    }
}
