//! Structured logging setup.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Raised when a global subscriber is already installed.
#[derive(Debug, Error)]
#[error("failed to install log subscriber: {0}")]
pub struct TelemetryError(String);

/// Default filter directive for the given verbosity.
#[must_use]
pub const fn default_directive(debug: bool) -> &'static str {
    if debug { "ovhvol=debug,tower_http=debug,info" } else { "info" }
}

/// Builds the log filter. `RUST_LOG` wins over the `--debug` flag.
#[must_use]
pub fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

/// Installs a `fmt` subscriber writing to stderr.
///
/// # Errors
///
/// Returns [`TelemetryError`] when a subscriber was already installed.
pub fn init(debug: bool) -> Result<(), TelemetryError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(debug)
        .try_init()
        .map_err(|err| TelemetryError(err.to_string()))
}
