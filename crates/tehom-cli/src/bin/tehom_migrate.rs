//! Migration tool for moving certification state from a state file to PostgreSQL
//!
//! Usage:
//!   tehom-migrate --source-config tehom.toml --dest-config tehom.postgresql.toml
//!   tehom-migrate --source-config tehom.toml --dest-config tehom.postgresql.toml --dry-run

use anyhow::{Context, Result};
use clap::Parser;

use tehom_cli::backend::load_config;
use tehom_core::storage_backend::{CertificationStore, FilesystemBackend, PostgresqlBackend, StoreSnapshot};
use tehom_core::StorageBackendKind;

#[derive(Parser, Debug)]
#[command(name = "tehom-migrate")]
#[command(about = "Migrate certification state from the filesystem to PostgreSQL", long_about = None)]
struct Args {
    /// Source configuration file (filesystem backend)
    #[arg(long)]
    source_config: String,

    /// Destination configuration file (PostgreSQL backend)
    #[arg(long)]
    dest_config: String,

    /// Dry run - show what would be migrated without writing
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tehom_cli::init_logging(args.verbose, log::LevelFilter::Info);

    log::info!("🚀 Starting certification state migration");

    let source = create_source_backend(&args)?;
    let dest = create_dest_backend(&args).await?;

    let snapshot = source
        .snapshot()
        .await
        .context("Failed to read source state")?;
    log_snapshot(&snapshot);

    if args.dry_run {
        log::info!("🔍 Dry run; nothing written");
        return Ok(());
    }

    dest.restore(&snapshot)
        .await
        .context("Failed to write destination state")?;

    log::info!("✅ Migration completed successfully");
    Ok(())
}

fn create_source_backend(args: &Args) -> Result<Box<dyn CertificationStore>> {
    log::info!("📂 Source: configuration file '{}'", args.source_config);
    let config = load_config(&args.source_config)?;
    match config.storage.backend {
        StorageBackendKind::Filesystem => Ok(Box::new(FilesystemBackend::new(
            &config.storage.filesystem,
            config.certification.merge_tolerance(),
        ))),
        StorageBackendKind::Postgresql => {
            anyhow::bail!("Source backend must be filesystem, not PostgreSQL")
        }
    }
}

async fn create_dest_backend(args: &Args) -> Result<Box<dyn CertificationStore>> {
    log::info!("🗄️  Destination: PostgreSQL from '{}'", args.dest_config);
    let config = load_config(&args.dest_config)?;
    match config.storage.backend {
        StorageBackendKind::Postgresql => {
            let backend = PostgresqlBackend::new(&config.storage.postgresql, config.certification.merge_tolerance())
                .await
                .context("Failed to create PostgreSQL backend")?;
            Ok(Box::new(backend))
        }
        StorageBackendKind::Filesystem => {
            anyhow::bail!("Destination backend must be PostgreSQL, not filesystem")
        }
    }
}

fn log_snapshot(snapshot: &StoreSnapshot) {
    let sensors: std::collections::BTreeSet<&str> =
        snapshot.progress.keys().map(|(sensor, _)| sensor.as_str()).collect();
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("📊 Migration Summary:");
    log::info!("   Sensors:          {}", sensors.len());
    log::info!("   Progress entries: {}", snapshot.progress.len());
    log::info!("   Certified spans:  {}", snapshot.spans.len());
    log::info!("   Coverage sets:    {}", snapshot.coverage.len());
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "tehom-migrate",
            "--source-config",
            "tehom.toml",
            "--dest-config",
            "tehom.postgresql.toml",
            "--dry-run",
        ]);
        assert_eq!(args.source_config, "tehom.toml");
        assert!(args.dry_run);
    }
}
