//! tehom-reset - Clear certification state
//!
//! Removes progress, certified spans and coverage for one sensor or for the
//! whole store, so the next certification run starts from scratch. Required
//! after a corrupt state file has been reported.
//!
//! Usage:
//!   tehom-reset --config tehom.toml --yes
//!   tehom-reset --config tehom.toml --sensor ICLISTENHF1252 --yes

use anyhow::Result;
use clap::Parser;

use tehom_cli::backend::{load_config, open_store};
use tehom_cli::output::{log_reset_summary, print_json};

#[derive(Parser, Debug)]
#[command(name = "tehom-reset")]
#[command(about = "Clear certification progress and coverage", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "tehom.toml")]
    config: String,

    /// Only clear state for this sensor
    #[arg(long)]
    sensor: Option<String>,

    /// Confirm the reset
    #[arg(long)]
    yes: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tehom_cli::init_logging(args.verbose, log::LevelFilter::Info);

    if !args.yes {
        anyhow::bail!("Refusing to reset without --yes");
    }

    let config = load_config(&args.config)?;
    let store = open_store(&config).await?;

    match &args.sensor {
        Some(sensor) => log::info!("🧹 Resetting certification state for sensor '{}'", sensor),
        None => log::info!("🧹 Resetting all certification state"),
    }

    let summary = store.reset(args.sensor.as_deref()).await?;
    log_reset_summary(&summary);
    print_json(&summary);

    log::info!("✅ Reset complete");
    Ok(())
}
