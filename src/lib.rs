//! Sushi - mobile SSH terminal core
//!
//! Interactive shell sessions over SSH (optionally through a relay host),
//! stream framing, connection supervision, a bounded ANSI terminal buffer and
//! templated plays.

pub mod config;
pub mod forwarding;
pub mod play;
pub mod session;
pub mod ssh;
pub mod terminal;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// `RUST_LOG` overrides the default `info` filter. Later calls are no-ops.
pub fn init_logging() {
    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::debug!("Logging initialized");
    }
}
