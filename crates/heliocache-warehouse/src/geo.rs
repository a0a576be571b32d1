//! Distance helpers and bounding boxes for proximity lookups.

/// Mean Earth radius (IUGG), kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Length of one degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// Great-circle distance between two coordinates using the haversine formula.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Equirectangular approximation: degree offsets converted with a fixed
/// kilometre-per-degree factor, longitude scaled by `cos(latitude)`.
#[must_use]
pub fn equirectangular_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = lat2 - lat1;
    let d_lon = (lon2 - lon1) * lat1.to_radians().cos();
    KM_PER_DEGREE * (d_lat * d_lat + d_lon * d_lon).sqrt()
}

/// Longitude part of a search box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LongitudeRange {
    /// Plain `west <= longitude <= east`.
    Span { west: f64, east: f64 },
    /// The box crosses the antimeridian: `longitude >= west OR longitude <= east`.
    Wrapped { west: f64, east: f64 },
}

impl LongitudeRange {
    /// SQL predicate with two positional parameters (`west`, `east`).
    #[must_use]
    pub const fn sql_predicate(self) -> &'static str {
        match self {
            Self::Span { .. } => "longitude BETWEEN ? AND ?",
            Self::Wrapped { .. } => "(longitude >= ? OR longitude <= ?)",
        }
    }

    #[must_use]
    pub const fn bounds(self) -> (f64, f64) {
        match self {
            Self::Span { west, east } | Self::Wrapped { west, east } => (west, east),
        }
    }

    #[must_use]
    pub fn contains(self, longitude: f64) -> bool {
        match self {
            Self::Span { west, east } => (west..=east).contains(&longitude),
            Self::Wrapped { west, east } => longitude >= west || longitude <= east,
        }
    }
}

/// Degree-offset bounding box around a centre point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub longitude: LongitudeRange,
}

impl SearchBounds {
    /// Build a box that contains every point within `radius_km` of the centre.
    #[must_use]
    pub fn around(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        let lat_offset = radius_km / KM_PER_DEGREE;
        let min_latitude = (latitude - lat_offset).max(-90.0);
        let max_latitude = (latitude + lat_offset).min(90.0);

        // The widest parallel inside the box decides the longitude span.
        let widest = min_latitude.abs().max(max_latitude.abs());
        let cos_lat = widest.to_radians().cos();
        let lon_offset = if cos_lat <= f64::EPSILON {
            180.0
        } else {
            radius_km / (KM_PER_DEGREE * cos_lat)
        };

        let longitude = if lon_offset >= 180.0 {
            LongitudeRange::Span {
                west: -180.0,
                east: 180.0,
            }
        } else {
            let west = longitude - lon_offset;
            let east = longitude + lon_offset;
            if west < -180.0 {
                LongitudeRange::Wrapped {
                    west: west + 360.0,
                    east,
                }
            } else if east > 180.0 {
                LongitudeRange::Wrapped {
                    west,
                    east: east - 360.0,
                }
            } else {
                LongitudeRange::Span { west, east }
            }
        };

        Self {
            min_latitude,
            max_latitude,
            longitude,
        }
    }

    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && self.longitude.contains(longitude)
    }
}
