//! Tracing subscriber setup for the proxy binary.
//!
//! Configures structured logging with span events and a level filter read from
//! `RUST_LOG`, defaulting to `info` when the environment variable is unset.

use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber.
///
/// Reads the level filter from `RUST_LOG`; falls back to `info` for this
/// crate and `warn` for dependencies when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_filter(filter),
        )
        .init();
}
