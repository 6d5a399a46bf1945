//! # Structured Logging Module
//!
//! Environment-filtered structured logging for host lifecycle events and
//! control-surface traffic. Initialization is idempotent so embedding
//! applications that already installed a global subscriber keep theirs.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging with an `RUST_LOG`-style environment filter.
///
/// Defaults to `info` when no filter is set. Safe to call more than once,
/// and safe to call when the embedding application already installed a
/// global subscriber.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already installed, keeping it");
        }
    });
}
