//! Shared helpers for the tehom operator tools

pub mod backend;
pub mod output;

/// Initialise `env_logger`; `--verbose` raises the level to debug
pub fn init_logging(verbose: bool, default: log::LevelFilter) {
    let level = if verbose { log::LevelFilter::Debug } else { default };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}
