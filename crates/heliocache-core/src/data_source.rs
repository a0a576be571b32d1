//! Provider contract and the common radiation-data shape.
//!
//! Every provider adapter turns its own response format into
//! [`RadiationData`] at the boundary, so nothing past the adapter ever sees
//! provider JSON or CSV.
//!
//! # Example
//!
//! ```rust,no_run
//! use heliocache_core::{PvgisAdapter, RadiationRequest, RadiationSource, SourceError};
//!
//! async fn fetch(adapter: &PvgisAdapter) -> Result<(), SourceError> {
//!     let request = RadiationRequest::new(-33.45, -70.65, 2024).expect("valid coordinate");
//!     let data = adapter.fetch(request).await?;
//!     println!("{} kWh/m2 from {}", data.annual_irradiance(), data.source_label);
//!     Ok(())
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{validate_coordinates, CircuitOpenError, ValidationError};
use crate::source::{DataTier, ProviderId};

pub const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// The most recent complete calendar year.
pub fn previous_year() -> i32 {
    OffsetDateTime::now_utc().year() - 1
}

/// Coordinate and year to fetch radiation data for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiationRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub year: i32,
}

impl RadiationRequest {
    pub fn new(latitude: f64, longitude: f64, year: i32) -> Result<Self, ValidationError> {
        validate_coordinates(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
            year,
        })
    }
}

/// Monthly irradiance for one coordinate, normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiationData {
    pub latitude: f64,
    pub longitude: f64,
    pub year: i32,
    /// Global irradiance per month, kWh/m², January first.
    pub monthly_irradiance: [f64; 12],
    pub data_tier: DataTier,
    pub source_label: String,
    /// Set when a provider answered with placeholder data instead of a
    /// measurement.
    #[serde(default)]
    pub synthetic: bool,
    #[serde(default)]
    pub elevation_m: Option<f64>,
}

impl RadiationData {
    pub fn annual_irradiance(&self) -> f64 {
        self.monthly_irradiance.iter().sum()
    }

    /// First word of the source label, used as the stored dataset name.
    pub fn source_dataset(&self) -> &str {
        self.source_label
            .split_whitespace()
            .next()
            .unwrap_or(self.source_label.as_str())
    }

    /// Reject data that must not win a race: synthetic placeholders,
    /// non-finite or negative months, and an all-dark year.
    pub fn check_quality(&self) -> Result<(), SourceError> {
        if self.synthetic {
            return Err(SourceError::invalid_response(format!(
                "'{}' returned placeholder data",
                self.source_label
            )));
        }
        if let Some(month) = self
            .monthly_irradiance
            .iter()
            .position(|value| !value.is_finite() || *value < 0.0)
        {
            return Err(SourceError::invalid_response(format!(
                "irradiance for {} is not a non-negative number",
                MONTH_NAMES[month]
            )));
        }
        if self.annual_irradiance() <= 0.0 {
            return Err(SourceError::invalid_response("annual irradiance is zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    CircuitOpen,
    RateLimited,
    Unavailable,
    OutOfCoverage,
    InvalidRequest,
    InvalidResponse,
    NotConfigured,
    Timeout,
    Internal,
}

/// Structured provider failure. Recorded by the racing fetcher, never fatal
/// to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl SourceError {
    fn with_kind(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Unavailable, message, true)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::with_kind(SourceErrorKind::RateLimited, message, true)
        }
    }

    pub fn out_of_coverage(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::OutOfCoverage, message, false)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::InvalidRequest, message, false)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::InvalidResponse, message, false)
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::NotConfigured, message, false)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Timeout, message, true)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Internal, message, false)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn is_circuit_open(&self) -> bool {
        matches!(self.kind, SourceErrorKind::CircuitOpen)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::OutOfCoverage => "source.out_of_coverage",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
            SourceErrorKind::NotConfigured => "source.not_configured",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl From<CircuitOpenError> for SourceError {
    fn from(error: CircuitOpenError) -> Self {
        Self {
            retry_after: Some(error.retry_after),
            ..Self::with_kind(SourceErrorKind::CircuitOpen, error.to_string(), true)
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// A radiation-data provider.
pub trait RadiationSource: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Fetch one year of monthly irradiance for a coordinate.
    ///
    /// # Errors
    /// Returns [`SourceError`] when the provider cannot produce data for the
    /// coordinate, including coverage gaps and malformed responses.
    fn fetch<'a>(
        &'a self,
        request: RadiationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RadiationData, SourceError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(monthly: [f64; 12]) -> RadiationData {
        RadiationData {
            latitude: 40.0,
            longitude: -3.7,
            year: 2024,
            monthly_irradiance: monthly,
            data_tier: DataTier::Engineering,
            source_label: String::from("PVGIS (PVGIS-SARAH2)"),
            synthetic: false,
            elevation_m: None,
        }
    }

    #[test]
    fn quality_check_rejects_placeholder_and_broken_months() {
        assert!(sample([100.0; 12]).check_quality().is_ok());

        let mut placeholder = sample([100.0; 12]);
        placeholder.synthetic = true;
        assert_eq!(
            placeholder.check_quality().map_err(|error| error.kind()),
            Err(SourceErrorKind::InvalidResponse)
        );

        let mut months = [100.0; 12];
        months[4] = f64::NAN;
        let error = sample(months).check_quality().expect_err("nan month");
        assert!(error.message().contains("May"));

        assert!(sample([0.0; 12]).check_quality().is_err());
    }

    #[test]
    fn source_dataset_is_the_first_label_word() {
        assert_eq!(sample([1.0; 12]).source_dataset(), "PVGIS");
    }

    #[test]
    fn circuit_open_converts_with_retry_hint() {
        let error = SourceError::from(CircuitOpenError {
            breaker: String::from("cams"),
            retry_after: Duration::from_secs(42),
        });
        assert!(error.is_circuit_open());
        assert_eq!(error.code(), "source.circuit_open");
        assert_eq!(error.retry_after(), Some(Duration::from_secs(42)));
    }

    #[test]
    fn request_rejects_invalid_coordinates() {
        assert!(RadiationRequest::new(95.0, 0.0, 2024).is_err());
        assert!(RadiationRequest::new(45.0, 7.0, 2024).is_ok());
    }
}
