//! Logging setup for processes embedding the cache
//!
//! The cache itself only emits `tracing` events; installing a subscriber is
//! left to the host. This helper covers the common case.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Parse a log level name, falling back to `info`
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a global subscriber
///
/// `RUST_LOG` directives are honoured on top of `level`. Output is JSON when
/// `json` is set, otherwise human-readable text with targets. Fails if a
/// global subscriber is already installed.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(parse_level(level).into());
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}
