//! Opt-in tracing setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host application's call. These helpers wire up the usual stack (env
//! filter, fmt layer, error-context layer) for binaries and tests that want
//! it with one line.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a global subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    init_with_filter("info");
}

/// Installs a global subscriber with an explicit default filter directive.
pub fn init_with_filter(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
