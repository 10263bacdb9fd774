pub mod commands;
pub mod config;
pub mod db;
pub mod import;
pub mod photos;

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG`, when set, wins over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("photoprep_lib={level},photoprep={level},warn")));
    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
