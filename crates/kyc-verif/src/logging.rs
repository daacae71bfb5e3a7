//! Logging setup and segment prefixes.
//!
//! The engine only emits `tracing` events; installing a subscriber is
//! left to the host. Samples and tests call these helpers.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::DebugLevel;

/// Install a compact subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    init_with_filter("info")
}

/// Install a compact subscriber with a custom default filter.
pub fn init_with_filter(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init()
        .is_ok()
}

/// Install a subscriber matching a configuration's `debug_level`.
pub fn init_with_level(level: DebugLevel) -> bool {
    init_with_filter(level.filter_directive())
}

/// Segment prefixes for log lines.
pub mod prefix {
    /// Session start
    pub const OPEN: &str = "✿";
    /// Session end
    pub const CLOSE: &str = "❀";
    /// Parallel delivery
    pub const DELIVERY: &str = "꩜";
    /// License handling
    pub const LICENSE: &str = "⚿";
}
