//! Opening stores and parsing shared arguments

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;

use tehom_core::storage_backend::{CertificationStore, FilesystemBackend, PostgresqlBackend};
use tehom_core::storage_config::{StorageBackendKind, TehomConfig};

/// Load and validate a configuration file
pub fn load_config(path: &str) -> Result<TehomConfig> {
    TehomConfig::load(Path::new(path)).with_context(|| format!("Failed to load configuration '{}'", path))
}

/// Open the certification store the configuration selects
pub async fn open_store(config: &TehomConfig) -> Result<Box<dyn CertificationStore>> {
    let tolerance = config.certification.merge_tolerance();
    match config.storage.backend {
        StorageBackendKind::Filesystem => {
            log::info!(
                "📂 Storage: state file '{}'",
                config.storage.filesystem.state_path.display()
            );
            Ok(Box::new(FilesystemBackend::new(&config.storage.filesystem, tolerance)))
        }
        StorageBackendKind::Postgresql => {
            log::info!(
                "🗄️  Storage: PostgreSQL {}:{}/{}",
                config.storage.postgresql.host,
                config.storage.postgresql.port,
                config.storage.postgresql.database
            );
            let backend = PostgresqlBackend::new(&config.storage.postgresql, tolerance)
                .await
                .context("Failed to create PostgreSQL backend")?;
            Ok(Box::new(backend))
        }
    }
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC)
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}': expected RFC 3339 or YYYY-MM-DD", s))
}

/// `lat,lon` pair
pub fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("invalid point '{}': expected LAT,LON", s))?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("invalid latitude in '{}'", s))?;
    let lon: f64 = lon.trim().parse().map_err(|_| format!("invalid longitude in '{}'", s))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("point '{}' is off the globe", s));
    }
    Ok((lat, lon))
}
