//! tehom-certify - Certify audio availability against the recording catalog
//!
//! Usage:
//!   tehom-certify --config tehom.toml --deployments deployments.json --catalog catalog.json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tehom_cli::backend::{load_config, open_store, parse_timestamp};
use tehom_cli::output::{log_certify_report, print_json};
use tehom_core::{load_deployments, Certifier, CertifyError, ListingCatalog};

#[derive(Parser, Debug)]
#[command(name = "tehom-certify")]
#[command(about = "Certify hydrophone audio availability against the catalog", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "tehom.toml")]
    config: String,

    /// Deployment records (JSON array)
    #[arg(long)]
    deployments: String,

    /// Catalog manifest (JSON)
    #[arg(long)]
    catalog: String,

    /// Resolve open-ended deployments against this instant instead of now
    #[arg(long, value_parser = parse_timestamp)]
    process_start: Option<DateTime<Utc>>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tehom_cli::init_logging(args.verbose, log::LevelFilter::Info);

    let process_start = args.process_start.unwrap_or_else(Utc::now);
    log::info!("🚀 Starting certification (process start {})", process_start);

    let config = load_config(&args.config)?;
    let deployments = load_deployments(Path::new(&args.deployments))?;
    let catalog = ListingCatalog::load(Path::new(&args.catalog), config.certification.file_duration())
        .with_context(|| format!("Failed to load catalog '{}'", args.catalog))?;
    let store = open_store(&config).await?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received; stopping after the current deployment record");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let certifier = Certifier::new(&catalog, store.as_ref(), config.certification.clone()).with_stop_flag(stop);
    let report = match certifier.certify(&deployments, process_start).await {
        Ok(report) => report,
        Err(e @ CertifyError::CorruptState(_)) => {
            log::error!("❌ {}", e);
            return Err(e.into());
        }
        Err(e) => return Err(e).context("Certification failed"),
    };

    log_certify_report(&report);
    print_json(&report);

    Ok(())
}
