//! Precomputed generation grid over tilt × orientation × month.
//!
//! One radiation fetch becomes an [`InterpolationModel`]; every later
//! estimate for that location is a bilinear lookup into the grid.

use serde::{Deserialize, Serialize};

use crate::data_source::{RadiationData, MONTH_NAMES};
use crate::error::ValidationError;
use crate::source::DataTier;

pub const TILT_STEP_DEGREES: u16 = 5;
pub const ORIENTATION_STEP_DEGREES: u16 = 15;

pub const DEFAULT_AREA_M2: f64 = 15.0;
pub const DEFAULT_PANEL_EFFICIENCY: f64 = 0.22;
pub const MIN_PANEL_EFFICIENCY: f64 = 0.18;
pub const MAX_PANEL_EFFICIENCY: f64 = 0.25;

const INVERTER_EFFICIENCY: f64 = 0.97;
const WIRING_LOSSES: f64 = 0.02;
const SOILING_LOSSES: f64 = 0.02;
const MIN_ORIENTATION_FACTOR: f64 = 0.5;

/// Tolerance for the annual == sum(months) check after JSON round trips.
const SUM_TOLERANCE_KWH: f64 = 1e-6;

/// Annual-optimal tilt: the latitude, snapped to the tilt grid.
pub fn optimal_tilt(latitude: f64) -> f64 {
    let step = f64::from(TILT_STEP_DEGREES);
    (latitude.abs().clamp(0.0, 90.0) / step).round() * step
}

/// Equator-facing orientation, degrees from north.
pub fn optimal_orientation(latitude: f64) -> f64 {
    if latitude > 0.0 {
        180.0
    } else {
        0.0
    }
}

/// Output share of a panel at `tilt`/`orientation` relative to the optimum.
///
/// Cosine falloff in both axes, floored at 0.5.
pub fn tilt_orientation_factor(tilt: f64, orientation: f64, latitude: f64) -> f64 {
    let tilt_diff = (tilt - optimal_tilt(latitude)).abs();
    let mut orientation_diff = (orientation - optimal_orientation(latitude)).abs() % 360.0;
    if orientation_diff > 180.0 {
        orientation_diff = 360.0 - orientation_diff;
    }

    let factor = (tilt_diff * 0.9).to_radians().cos() * (orientation_diff * 0.5).to_radians().cos();
    factor.max(MIN_ORIENTATION_FACTOR)
}

pub fn system_efficiency(panel_efficiency: f64) -> f64 {
    panel_efficiency * INVERTER_EFFICIENCY * (1.0 - WIRING_LOSSES) * (1.0 - SOILING_LOSSES)
}

pub fn validate_area(area_m2: f64) -> Result<(), ValidationError> {
    if !area_m2.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "area_m2" });
    }
    if area_m2 <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field: "area_m2" });
    }
    Ok(())
}

pub fn validate_efficiency(panel_efficiency: f64) -> Result<(), ValidationError> {
    if !(MIN_PANEL_EFFICIENCY..=MAX_PANEL_EFFICIENCY).contains(&panel_efficiency) {
        return Err(ValidationError::EfficiencyOutOfRange {
            value: panel_efficiency,
            min: MIN_PANEL_EFFICIENCY,
            max: MAX_PANEL_EFFICIENCY,
        });
    }
    Ok(())
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Generation for one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyGeneration {
    pub month: &'static str,
    pub kwh: f64,
}

/// Result of one lookup into the grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationEstimate {
    pub tilt: f64,
    pub orientation: f64,
    pub annual_kwh: f64,
    pub monthly: Vec<MonthlyGeneration>,
    pub peak_month: MonthlyGeneration,
    pub worst_month: MonthlyGeneration,
    /// `annual_kwh / optimal_annual_kwh`, 1.0 when the optimum is zero.
    pub efficiency_vs_optimal: f64,
    pub optimal_tilt: f64,
    pub optimal_orientation: f64,
}

/// Dense generation grid for one location, panel area and efficiency.
///
/// Immutable once built. `rescaled` returns a copy for a different area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationModel {
    pub latitude: f64,
    pub longitude: f64,
    pub tilts: Vec<f64>,
    pub orientations: Vec<f64>,
    /// `[tilt][orientation][month]`, kWh.
    pub monthly_values: Vec<Vec<[f64; 12]>>,
    /// `[tilt][orientation]`, kWh, always the sum of the matching months.
    pub annual_values: Vec<Vec<f64>>,
    pub optimal_tilt: f64,
    pub optimal_orientation: f64,
    pub optimal_annual_kwh: f64,
    pub area_m2: f64,
    pub panel_efficiency: f64,
    pub data_tier: DataTier,
    #[serde(default)]
    pub source_label: String,
    pub year: i32,
}

impl InterpolationModel {
    /// Evaluate the generation function on every grid point.
    pub fn build(
        data: &RadiationData,
        area_m2: f64,
        panel_efficiency: f64,
    ) -> Result<Self, ValidationError> {
        validate_area(area_m2)?;
        validate_efficiency(panel_efficiency)?;
        if data.monthly_irradiance.iter().any(|value| !value.is_finite()) {
            return Err(ValidationError::NonFiniteValue {
                field: "monthly_irradiance",
            });
        }

        let tilts: Vec<f64> = (0..=90u16)
            .step_by(usize::from(TILT_STEP_DEGREES))
            .map(f64::from)
            .collect();
        let orientations: Vec<f64> = (0..360u16)
            .step_by(usize::from(ORIENTATION_STEP_DEGREES))
            .map(f64::from)
            .collect();
        let efficiency = system_efficiency(panel_efficiency);

        let mut monthly_values = Vec::with_capacity(tilts.len());
        let mut annual_values = Vec::with_capacity(tilts.len());
        for &tilt in &tilts {
            let mut row_months = Vec::with_capacity(orientations.len());
            let mut row_annual = Vec::with_capacity(orientations.len());
            for &orientation in &orientations {
                let factor = tilt_orientation_factor(tilt, orientation, data.latitude);
                let months = data
                    .monthly_irradiance
                    .map(|irradiance| round1(irradiance * area_m2 * factor * efficiency));
                row_annual.push(months.iter().sum());
                row_months.push(months);
            }
            monthly_values.push(row_months);
            annual_values.push(row_annual);
        }

        let optimal_tilt = optimal_tilt(data.latitude);
        let optimal_orientation = optimal_orientation(data.latitude);
        let mut model = Self {
            latitude: data.latitude,
            longitude: data.longitude,
            tilts,
            orientations,
            monthly_values,
            annual_values,
            optimal_tilt,
            optimal_orientation,
            optimal_annual_kwh: 0.0,
            area_m2,
            panel_efficiency,
            data_tier: data.data_tier,
            source_label: data.source_label.clone(),
            year: data.year,
        };
        model.optimal_annual_kwh = model.annual_at_optimum();
        Ok(model)
    }

    fn annual_at_optimum(&self) -> f64 {
        let tilt_index = nearest_index(&self.tilts, self.optimal_tilt);
        let orientation_index = nearest_index(&self.orientations, self.optimal_orientation);
        self.annual_values
            .get(tilt_index)
            .and_then(|row| row.get(orientation_index))
            .copied()
            .unwrap_or(0.0)
    }

    /// Monthly and annual values of one grid cell.
    fn cell(&self, tilt_index: usize, orientation_index: usize) -> Result<(&[f64; 12], f64), ValidationError> {
        let months = self
            .monthly_values
            .get(tilt_index)
            .and_then(|row| row.get(orientation_index));
        let annual = self
            .annual_values
            .get(tilt_index)
            .and_then(|row| row.get(orientation_index));
        match (months, annual) {
            (Some(months), Some(annual)) => Ok((months, *annual)),
            _ => Err(ValidationError::SparseGrid {
                detail: format!("no cell at [{tilt_index}][{orientation_index}]"),
            }),
        }
    }

    /// Check the grid is dense and every annual value is the sum of its months.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let sparse = |detail: String| Err(ValidationError::SparseGrid { detail });

        if self.tilts.len() < 2 || self.orientations.len() < 2 {
            return sparse(format!(
                "grid is {}x{}",
                self.tilts.len(),
                self.orientations.len()
            ));
        }
        if self.monthly_values.len() != self.tilts.len()
            || self.annual_values.len() != self.tilts.len()
        {
            return sparse(String::from("row count does not match tilts"));
        }

        for (tilt_index, (months_row, annual_row)) in self
            .monthly_values
            .iter()
            .zip(&self.annual_values)
            .enumerate()
        {
            if months_row.len() != self.orientations.len()
                || annual_row.len() != self.orientations.len()
            {
                return sparse(format!("tilt row {tilt_index} is missing orientations"));
            }
            for (orientation_index, (months, annual)) in months_row.iter().zip(annual_row).enumerate() {
                let sum: f64 = months.iter().sum();
                if (sum - annual).abs() > SUM_TOLERANCE_KWH {
                    return sparse(format!(
                        "annual value at [{tilt_index}][{orientation_index}] is {annual}, months sum to {sum}"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Bilinear lookup for any tilt in [0, 90] and any orientation.
    ///
    /// Orientation wraps around, so 350° blends the 345° and 0° columns.
    pub fn interpolate(
        &self,
        tilt: f64,
        orientation: f64,
    ) -> Result<GenerationEstimate, ValidationError> {
        if !tilt.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "tilt" });
        }
        if !orientation.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: "orientation",
            });
        }
        if !(0.0..=90.0).contains(&tilt) {
            return Err(ValidationError::TiltOutOfRange { value: tilt });
        }
        if self.tilts.len() < 2 || self.orientations.len() < 2 {
            return Err(ValidationError::SparseGrid {
                detail: format!("grid is {}x{}", self.tilts.len(), self.orientations.len()),
            });
        }

        let orientation = orientation.rem_euclid(360.0);
        let (t0, t1, tilt_fraction) = bracket(&self.tilts, tilt);
        let (o0, o1, orientation_fraction) = bracket_wrapping(&self.orientations, orientation);
        let (m00, a00) = self.cell(t0, o0)?;
        let (m01, a01) = self.cell(t0, o1)?;
        let (m10, a10) = self.cell(t1, o0)?;
        let (m11, a11) = self.cell(t1, o1)?;

        let blend = |v00: f64, v01: f64, v10: f64, v11: f64| {
            v00 * (1.0 - tilt_fraction) * (1.0 - orientation_fraction)
                + v01 * (1.0 - tilt_fraction) * orientation_fraction
                + v10 * tilt_fraction * (1.0 - orientation_fraction)
                + v11 * tilt_fraction * orientation_fraction
        };

        let annual = blend(a00, a01, a10, a11);
        let monthly: Vec<MonthlyGeneration> = MONTH_NAMES
            .iter()
            .enumerate()
            .map(|(month, &name)| MonthlyGeneration {
                month: name,
                kwh: blend(m00[month], m01[month], m10[month], m11[month]),
            })
            .collect();

        let mut peak = &monthly[0];
        let mut worst = &monthly[0];
        for month in &monthly[1..] {
            if month.kwh > peak.kwh {
                peak = month;
            }
            if month.kwh < worst.kwh {
                worst = month;
            }
        }
        let rounded = |month: &MonthlyGeneration| MonthlyGeneration {
            month: month.month,
            kwh: round1(month.kwh),
        };
        let peak_month = rounded(peak);
        let worst_month = rounded(worst);

        let efficiency_vs_optimal = if self.optimal_annual_kwh > 0.0 {
            (annual / self.optimal_annual_kwh * 1000.0).round() / 1000.0
        } else {
            1.0
        };

        Ok(GenerationEstimate {
            tilt,
            orientation,
            annual_kwh: round1(annual),
            monthly: monthly.iter().map(rounded).collect(),
            peak_month,
            worst_month,
            efficiency_vs_optimal,
            optimal_tilt: self.optimal_tilt,
            optimal_orientation: self.optimal_orientation,
        })
    }

    /// Copy of this model for a different panel area. Every stored value
    /// scales linearly; nothing is re-fetched.
    pub fn rescaled(&self, area_m2: f64) -> Result<Self, ValidationError> {
        validate_area(area_m2)?;
        if self.area_m2 <= 0.0 {
            return Err(ValidationError::NonPositiveValue { field: "area_m2" });
        }

        let scale = area_m2 / self.area_m2;
        let monthly_values: Vec<Vec<[f64; 12]>> = self
            .monthly_values
            .iter()
            .map(|row| row.iter().map(|months| months.map(|kwh| kwh * scale)).collect())
            .collect();
        let annual_values = monthly_values
            .iter()
            .map(|row| row.iter().map(|months| months.iter().sum()).collect())
            .collect();

        let mut model = Self {
            monthly_values,
            annual_values,
            area_m2,
            ..self.clone()
        };
        model.optimal_annual_kwh = model.annual_at_optimum();
        Ok(model)
    }

    pub fn grid_max_annual(&self) -> f64 {
        self.annual_values
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

fn nearest_index(values: &[f64], target: f64) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Lower index, upper index and fraction for a clamped axis.
fn bracket(values: &[f64], value: f64) -> (usize, usize, f64) {
    let last = values.len() - 1;
    match values.iter().position(|&grid| value < grid) {
        Some(0) => (0, 0, 0.0),
        Some(upper) => {
            let lower = upper - 1;
            let fraction = (value - values[lower]) / (values[upper] - values[lower]);
            (lower, upper, fraction)
        }
        None => (last, last, 0.0),
    }
}

/// Like [`bracket`], but past the last column the axis wraps to the first.
fn bracket_wrapping(values: &[f64], value: f64) -> (usize, usize, f64) {
    let last = values.len() - 1;
    if value >= values[last] {
        let span = 360.0 - values[last] + values[0];
        return (last, 0, (value - values[last]) / span);
    }
    bracket(values, value)
}
