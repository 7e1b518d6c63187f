//! tehom-sample - Schedule and label repeatable samples
//!
//! Resolves joint vessel/audio coverage per sensor, schedules sample times
//! and labels them with vessel positions. Prints the sample index as JSON.
//!
//! Usage:
//!   tehom-sample --config tehom.toml --deployments deployments.json \
//!       --sensor ICLISTENHF1252 --begin 2016-01-01 --end 2016-02-01 --vessels vessels.json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::Path;

use tehom_cli::backend::{load_config, parse_point, parse_timestamp};
use tehom_cli::output::print_json;
use tehom_core::{
    load_deployments, sample, FilesystemBackend, GeoBox, Interval, JsonVesselSource, PostgresqlBackend,
    PostgresqlVesselSource, SampleRequest, SampleSources, SpanStore, StorageBackendKind, VesselSource,
};

#[derive(Parser, Debug)]
#[command(name = "tehom-sample")]
#[command(about = "Schedule repeatable samples over joint vessel/audio coverage", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "tehom.toml")]
    config: String,

    /// Deployment records (JSON array)
    #[arg(long)]
    deployments: String,

    /// Sensor to sample (repeatable)
    #[arg(long = "sensor", required = true)]
    sensors: Vec<String>,

    /// Window start (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_timestamp)]
    begin: DateTime<Utc>,

    /// Window end, exclusive
    #[arg(long, value_parser = parse_timestamp)]
    end: DateTime<Utc>,

    /// South-west corner of the query area as LAT,LON
    #[arg(long, value_parser = parse_point, requires = "top_right")]
    bottom_left: Option<(f64, f64)>,

    /// North-east corner of the query area as LAT,LON
    #[arg(long, value_parser = parse_point, requires = "bottom_left")]
    top_right: Option<(f64, f64)>,

    /// Vessel-tracking JSON file; defaults to the PostgreSQL tables when the
    /// PostgreSQL backend is configured
    #[arg(long)]
    vessels: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Default: no logs (clean JSON output for parsing)
    tehom_cli::init_logging(args.verbose, log::LevelFilter::Off);

    let config = load_config(&args.config)?;
    let sampling = config.require_sampling()?.clone();
    let tolerance = config.certification.merge_tolerance();

    let window = Interval::new(args.begin, args.end).context("--begin must be before --end")?;
    let area = match (args.bottom_left, args.top_right) {
        (Some(bl), Some(tr)) => GeoBox::new(bl, tr)?,
        _ => GeoBox::WORLD,
    };
    let deployments = load_deployments(Path::new(&args.deployments))?;

    let (audio, pg_vessels): (Box<dyn SpanStore>, Option<PostgresqlVesselSource>) = match config.storage.backend {
        StorageBackendKind::Filesystem => (
            Box::new(FilesystemBackend::new(&config.storage.filesystem, tolerance)) as Box<dyn SpanStore>,
            None,
        ),
        StorageBackendKind::Postgresql => {
            let backend = PostgresqlBackend::new(&config.storage.postgresql, tolerance)
                .await
                .context("Failed to create PostgreSQL backend")?;
            let vessels = PostgresqlVesselSource::new(backend.pool().clone());
            (Box::new(backend) as Box<dyn SpanStore>, Some(vessels))
        }
    };

    let json_vessels = match &args.vessels {
        Some(path) => Some(JsonVesselSource::load(Path::new(path))?),
        None => None,
    };
    let vessels: &dyn VesselSource = match (&json_vessels, &pg_vessels) {
        (Some(json), _) => json,
        (None, Some(pg)) => pg,
        (None, None) => anyhow::bail!("--vessels is required with the filesystem backend"),
    };

    let sources = SampleSources {
        vessels,
        audio: audio.as_ref(),
        deployments: &deployments,
    };
    let request = SampleRequest {
        sensors: args.sensors,
        window,
        area,
        extension: config.certification.extension.clone(),
    };

    let index = sample(&sources, &request, &sampling, tolerance).await?;
    print_json(&index);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "tehom-sample",
            "--deployments",
            "deployments.json",
            "--sensor",
            "H1",
            "--sensor",
            "H2",
            "--begin",
            "2016-01-01",
            "--end",
            "2016-02-01T00:00:00Z",
            "--bottom-left",
            "45,-130",
            "--top-right",
            "50,-120",
        ]);
        assert_eq!(args.sensors, vec!["H1", "H2"]);
        assert_eq!(args.bottom_left, Some((45.0, -130.0)));
        assert!(args.vessels.is_none());
    }

    #[test]
    fn test_corner_requires_other_corner() {
        let result = Args::try_parse_from([
            "tehom-sample",
            "--deployments",
            "d.json",
            "--sensor",
            "H1",
            "--begin",
            "2016-01-01",
            "--end",
            "2016-02-01",
            "--bottom-left",
            "45,-130",
        ]);
        assert!(result.is_err());
    }
}
