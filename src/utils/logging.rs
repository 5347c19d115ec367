//! Tracing subscriber setup
//!
//! Log lines go to stderr so reports written to stdout stay machine readable.
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Fallback filter when neither `RUST_LOG` nor the configuration sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Build the filter: `RUST_LOG` if set, else `level`, else `DEFAULT_LOG_LEVEL`
pub fn build_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or(DEFAULT_LOG_LEVEL)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Install the global subscriber.
///
/// With `debug` set, debug level is forced regardless of `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(level: Option<&str>, debug: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        build_filter(level)
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init()
}
