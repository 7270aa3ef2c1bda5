//! Logging setup for the `prober` binary.
//!
//! Logs go to stderr; stdout carries metrics or JSON status output.

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. Falls back to `info` when `level`
/// is not a valid filter; a second call is a no-op.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_level(true)
        .with_target(false)
        .try_init();
}
