use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical identifiers of the radiation-data providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Cams,
    Pvgis,
}

impl ProviderId {
    pub const ALL: [Self; 2] = [Self::Cams, Self::Pvgis];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cams => "cams",
            Self::Pvgis => "pvgis",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cams" | "copernicus" => Ok(Self::Cams),
            "pvgis" => Ok(Self::Pvgis),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

/// Confidence label attached to radiation data and the models built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTier {
    /// High-resolution satellite coverage.
    Engineering,
    /// Reanalysis or degraded coverage.
    Standard,
    /// Synthetic fallback.
    Estimated,
}

impl DataTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Engineering => "engineering",
            Self::Standard => "standard",
            Self::Estimated => "estimated",
        }
    }
}

impl Display for DataTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataTier {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "engineering" => Ok(Self::Engineering),
            "standard" => Ok(Self::Standard),
            "estimated" => Ok(Self::Estimated),
            other => Err(ValidationError::InvalidDataTier {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_parse_case_insensitively() {
        assert_eq!("PVGIS".parse::<ProviderId>(), Ok(ProviderId::Pvgis));
        assert_eq!("copernicus".parse::<ProviderId>(), Ok(ProviderId::Cams));
        assert!(matches!(
            "nasa".parse::<ProviderId>(),
            Err(ValidationError::InvalidSource { .. })
        ));
    }

    #[test]
    fn data_tier_serializes_lowercase() {
        let json = serde_json::to_string(&DataTier::Engineering).expect("serialize");
        assert_eq!(json, "\"engineering\"");
        assert_eq!(" Standard ".parse::<DataTier>(), Ok(DataTier::Standard));
    }
}
