//! # Logging Initialization
//!
//! Installs the global `tracing` subscriber exactly once. Verbosity comes from
//! `RUST_LOG`; when it is unset the adapter logs at `info` with its own crate
//! at `debug`. Output goes to stderr, which the container runtime collects.
//! Stdout is left alone since nothing about the HTTP side uses it.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,mcp_adapter=debug";

/// Initializes the logging system. Later calls are no-ops.
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
