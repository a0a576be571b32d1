//! Process-wide tracing setup.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Env var consulted when `RUST_LOG` is unset.
pub const LOG_ENV: &str = "HELIOCACHE_LOG";

/// Install a stderr subscriber once. Later calls are no-ops, as is a call
/// made after some other subscriber was installed.
///
/// The filter comes from `RUST_LOG`, then `HELIOCACHE_LOG`, then
/// `default_level`.
pub fn init_tracing(default_level: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_from_env(LOG_ENV))
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false)
                .with_filter(filter),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already set; keeping it");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_harmless() {
        init_tracing("warn");
        init_tracing("debug");
        tracing::info!("still logging");
    }
}
