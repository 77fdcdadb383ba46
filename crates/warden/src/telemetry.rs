//! Tracing setup for Warden processes.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter` when it is set and
/// parses. An unparsable `default_filter` falls back to `info`. Calling this
/// more than once is harmless: later calls leave the first subscriber in
/// place.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(fmt::layer().with_target(true))
        .try_init();
}

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
