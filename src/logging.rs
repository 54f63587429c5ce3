//! Logging setup for the provider process.
//!
//! All logs are written to **stderr**; stdout belongs to the plugin host.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`, `puppetdb_provider=debug`)
//!
//! # Examples
//!
//! ```bash
//! # Trace every PuppetDB request and retry attempt
//! RUST_LOG=puppetdb_provider=trace ./puppetdb-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Initialize the default logging subscriber.
///
/// Respects `RUST_LOG` and defaults to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    subscriber("info").init();
}

/// Initialize logging with a custom default level, used when `RUST_LOG` is
/// not set.
///
/// # Example
///
/// ```ignore
/// use puppetdb_provider::init_logging_with_default;
///
/// fn main() {
///     init_logging_with_default("debug");
/// }
/// ```
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Try to initialize logging, returning false if already initialized.
pub fn try_init_logging() -> bool {
    subscriber("info").try_init().is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so only the
    // idempotent entry point is exercised here.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("puppetdb_provider=debug").is_ok());
        assert!(EnvFilter::try_new("warn,puppetdb_provider::retry=trace").is_ok());
    }

    #[test]
    fn test_try_init_is_idempotent() {
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
