//! Structured logging for the analyzer host using the tracing crate.
//!
//! Log lines go to stderr so stdout stays reserved for the status readout and
//! capture reports.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Initializes the global subscriber.
///
/// Log level is controlled by the RUST_LOG environment variable (defaults to
/// "info", or "debug" with `--verbose`).
pub fn init_logging(verbose: bool) -> Result<(), anyhow::Error> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Logging already initialized: {e}"))?;

    tracing::debug!("Logging initialized");
    Ok(())
}
