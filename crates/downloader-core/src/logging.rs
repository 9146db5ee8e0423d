use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "DOWNLOADER_LOG";

/// Installs the global fmt subscriber filtered by `DOWNLOADER_LOG`
/// (default `info`). Returns false if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
