use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] heliocache_core::ValidationError),

    #[error(transparent)]
    Config(#[from] heliocache_core::ConfigError),

    #[error("command error: {0}")]
    Command(String),

    #[error("strict mode failed: warnings={warning_count}")]
    StrictModeViolation { warning_count: usize },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<heliocache_core::CoreError> for CliError {
    fn from(error: heliocache_core::CoreError) -> Self {
        match error {
            heliocache_core::CoreError::Validation(error) => Self::Validation(error),
            other => Self::Command(other.to_string()),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) => 2,
            Self::Serialization(_) => 4,
            Self::StrictModeViolation { .. } => 5,
            Self::Command(_) => 10,
        }
    }
}
