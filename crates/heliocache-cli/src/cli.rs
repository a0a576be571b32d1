//! CLI argument definitions for heliocache.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `estimate` | Generation estimate for a coordinate and panel setup |
//! | `nearby` | Nearest cached model within a radius |
//! | `cache` | Warm-tier stats, expiry sweep, hot-tier invalidation |
//! | `sources` | Provider admission state |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat warnings as errors |
//! | `--log-level` | `warn` | Fallback filter when `RUST_LOG` and `HELIOCACHE_LOG` are unset |
//!
//! # Examples
//!
//! ```bash
//! heliocache estimate --lat -33.45 --lon -70.65 --pretty
//! heliocache estimate --lat 40.4 --lon -3.7 --area 20 --tilt 30 --orientation 180
//! heliocache nearby --lat -33.46 --lon -70.66 --radius-km 10
//! heliocache cache sweep --dry-run
//! ```

use clap::{Args, Parser, Subcommand};
use heliocache_core::{DEFAULT_AREA_M2, DEFAULT_PANEL_EFFICIENCY};

/// Solar radiation models for any coordinate, cached and shared.
#[derive(Debug, Parser)]
#[command(
    name = "heliocache",
    author,
    version,
    about = "Cached solar generation estimates backed by PVGIS and CAMS",
    long_about = "heliocache resolves a one-year solar radiation model for a coordinate. \
It looks in a process-local hot tier, then in a persistent DuckDB warm tier \
searched by proximity, and only then races the PVGIS and CAMS providers.\n\
\n\
Use 'heliocache <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Fail with exit code 5 when the result carries warnings.
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Log filter used when neither RUST_LOG nor HELIOCACHE_LOG is set.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Estimate yearly and monthly generation for a panel setup.
    ///
    /// Without --tilt and --orientation the optimum for the location is used.
    ///
    /// # Examples
    ///
    ///   heliocache estimate --lat -33.45 --lon -70.65
    ///   heliocache estimate --lat 52.5 --lon 13.4 --tilt 35 --orientation 180
    Estimate(EstimateArgs),

    /// Look up the nearest cached model without fetching anything.
    Nearby(NearbyArgs),

    /// Cache maintenance commands.
    Cache(CacheArgs),

    /// Show circuit, rate-limit and concurrency state per provider.
    Sources,
}

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, Args)]
pub struct CoordinateArgs {
    /// Latitude in degrees, [-90, 90].
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in degrees, [-180, 180].
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,
}

#[derive(Debug, Args)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub coordinate: CoordinateArgs,

    /// Panel area in m².
    #[arg(long, default_value_t = DEFAULT_AREA_M2)]
    pub area: f64,

    /// Panel efficiency, [0.18, 0.25].
    #[arg(long, default_value_t = DEFAULT_PANEL_EFFICIENCY)]
    pub efficiency: f64,

    /// Panel tilt in degrees, [0, 90].
    #[arg(long)]
    pub tilt: Option<f64>,

    /// Panel azimuth in degrees, 180 faces south.
    #[arg(long)]
    pub orientation: Option<f64>,
}

#[derive(Debug, Args)]
pub struct NearbyArgs {
    #[command(flatten)]
    pub coordinate: CoordinateArgs,

    /// Search radius in km. Defaults to HELIOCACHE_RADIUS_KM.
    #[arg(long)]
    pub radius_km: Option<f64>,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Warm-tier totals by source and tier, plus expiry counts.
    Stats,

    /// Delete expired warm-tier entries.
    Sweep {
        /// Count expired entries without deleting them.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Drop the hot-tier entry for a coordinate.
    Invalidate(CoordinateArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "heliocache",
            "estimate",
            "--lat",
            "-33.45",
            "--lon",
            "-70.65",
            "--tilt",
            "30",
        ])
        .expect("valid arguments");

        let Command::Estimate(args) = cli.command else {
            panic!("expected estimate");
        };
        assert_eq!(args.coordinate.lat, -33.45);
        assert_eq!(args.coordinate.lon, -70.65);
        assert_eq!(args.tilt, Some(30.0));
        assert_eq!(args.orientation, None);
        assert_eq!(args.area, DEFAULT_AREA_M2);
    }

    #[test]
    fn parses_cache_sweep_dry_run_with_global_flags() {
        let cli = Cli::try_parse_from(["heliocache", "cache", "sweep", "--dry-run", "--pretty"])
            .expect("valid arguments");

        assert!(cli.pretty);
        assert!(matches!(
            cli.command,
            Command::Cache(CacheArgs {
                command: CacheCommand::Sweep { dry_run: true }
            })
        ));
    }

    #[test]
    fn coordinates_are_required() {
        assert!(Cli::try_parse_from(["heliocache", "nearby", "--lat", "10"]).is_err());
    }
}
