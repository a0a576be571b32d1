use std::time::Duration;

use thiserror::Error;

/// Validation errors raised before any I/O happens.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("latitude {value} out of range [-90, 90]")]
    LatitudeOutOfRange { value: f64 },
    #[error("longitude {value} out of range [-180, 180]")]
    LongitudeOutOfRange { value: f64 },
    #[error("tilt {value} out of range [0, 90]")]
    TiltOutOfRange { value: f64 },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be positive")]
    NonPositiveValue { field: &'static str },

    #[error("panel efficiency {value} out of range [{min}, {max}]")]
    EfficiencyOutOfRange { value: f64, min: f64, max: f64 },

    #[error("invalid source '{value}', expected one of cams, pvgis")]
    InvalidSource { value: String },
    #[error("invalid data tier '{value}', expected one of engineering, standard, estimated")]
    InvalidDataTier { value: String },

    #[error("interpolation grid is not dense: {detail}")]
    SparseGrid { detail: String },
}

/// Fail-fast signal from an open circuit breaker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("circuit '{breaker}' is open; retry after {}s", .retry_after.as_secs())]
pub struct CircuitOpenError {
    pub breaker: String,
    pub retry_after: Duration,
}

/// Hot or warm cache store failure. Always absorbed by the orchestrator.
#[derive(Debug, Error)]
pub enum CacheBackendError {
    #[error("hot tier unavailable: {0}")]
    Hot(String),

    #[error("warm tier unavailable: {0}")]
    Warm(#[from] heliocache_warehouse::WarehouseError),

    #[error("warm tier task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("cached payload could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("cached model is inconsistent: {0}")]
    InconsistentModel(#[from] ValidationError),
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cache(#[from] CacheBackendError),
}

/// Reject coordinates outside the WGS84 range.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ValidationError> {
    if !latitude.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "latitude" });
    }
    if !longitude.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "longitude" });
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::LatitudeOutOfRange { value: latitude });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::LongitudeOutOfRange { value: longitude });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_range_checked() {
        assert!(validate_coordinates(-33.45, -70.65).is_ok());
        assert_eq!(
            validate_coordinates(90.5, 0.0),
            Err(ValidationError::LatitudeOutOfRange { value: 90.5 })
        );
        assert_eq!(
            validate_coordinates(0.0, -181.0),
            Err(ValidationError::LongitudeOutOfRange { value: -181.0 })
        );
        assert_eq!(
            validate_coordinates(f64::NAN, 0.0),
            Err(ValidationError::NonFiniteValue { field: "latitude" })
        );
    }

    #[test]
    fn circuit_open_message_reports_whole_seconds() {
        let error = CircuitOpenError {
            breaker: String::from("pvgis"),
            retry_after: Duration::from_millis(12_400),
        };
        assert_eq!(error.to_string(), "circuit 'pvgis' is open; retry after 12s");
    }
}
