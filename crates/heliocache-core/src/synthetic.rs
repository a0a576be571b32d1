//! Deterministic stand-in radiation data for when no provider answers.

use crate::data_source::RadiationData;
use crate::source::DataTier;

pub const SYNTHETIC_LABEL: &str = "Synthetic (fallback)";

/// Annual horizontal irradiance at the equator, kWh/m².
const EQUATOR_ANNUAL_KWH_M2: f64 = 1500.0;
const MIN_LATITUDE_FACTOR: f64 = 0.05;
const SUMMER_FACTOR: f64 = 1.3;
const WINTER_FACTOR: f64 = 0.85;

/// Latitude-only irradiance estimate. Same input, same output.
#[derive(Debug, Clone, Default)]
pub struct SyntheticGenerator {
    label: Option<String>,
}

impl SyntheticGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different source label, e.g. for a provider's placeholder answer.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    pub fn generate(&self, latitude: f64, longitude: f64, year: i32) -> RadiationData {
        let latitude_factor = (1.0 - latitude.abs() / 90.0).max(MIN_LATITUDE_FACTOR);
        let monthly_base = EQUATOR_ANNUAL_KWH_M2 * latitude_factor / 12.0;

        let mut monthly_irradiance = [0.0; 12];
        for (index, value) in monthly_irradiance.iter_mut().enumerate() {
            let month = index as u8 + 1;
            let factor = seasonal_factor(latitude, month);
            *value = (monthly_base * factor * 10.0).round() / 10.0;
        }

        RadiationData {
            latitude,
            longitude,
            year,
            monthly_irradiance,
            data_tier: DataTier::Estimated,
            source_label: self
                .label
                .clone()
                .unwrap_or_else(|| String::from(SYNTHETIC_LABEL)),
            synthetic: true,
            elevation_m: None,
        }
    }
}

/// Local summer quarter is brighter, local winter quarter darker.
fn seasonal_factor(latitude: f64, month: u8) -> f64 {
    let (summer, winter) = if latitude >= 0.0 {
        ([6, 7, 8], [12, 1, 2])
    } else {
        ([12, 1, 2], [6, 7, 8])
    };

    if summer.contains(&month) {
        SUMMER_FACTOR
    } else if winter.contains(&month) {
        WINTER_FACTOR
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let generator = SyntheticGenerator::new();
        assert_eq!(
            generator.generate(-33.45, -70.65, 2024),
            generator.generate(-33.45, -70.65, 2024)
        );
    }

    #[test]
    fn southern_summer_is_december() {
        let data = SyntheticGenerator::new().generate(-33.45, -70.65, 2024);
        assert!(data.monthly_irradiance[11] > data.monthly_irradiance[5]);
        assert_eq!(data.data_tier, DataTier::Estimated);
        assert!(data.synthetic);
        assert_eq!(data.source_label, SYNTHETIC_LABEL);
    }

    #[test]
    fn poles_still_get_some_light() {
        let data = SyntheticGenerator::new().generate(90.0, 0.0, 2024);
        assert!(data.annual_irradiance() > 0.0);
        assert!(data.monthly_irradiance[6] > data.monthly_irradiance[0]);
    }
}
