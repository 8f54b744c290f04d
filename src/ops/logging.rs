//! Logging setup.
//!
//! Installs the process-wide tracing subscriber from [`LogOptions`]:
//! events go to stderr or to an appended log file, the level comes from
//! the options (with `debug` forcing debug output), and self-produced
//! timestamps can be switched off when an outer harness stamps lines
//! itself.

use crate::core::config::LogOptions;
use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Fails if one is already installed.
pub fn init(opts: &LogOptions) -> Result<()> {
    let directive = if opts.debug { "debug" } else { opts.level.as_str() };
    let filter = EnvFilter::try_new(directive).context("invalid log level")?;

    match &opts.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {path}"))?;
            let layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false);
            if opts.self_timestamp {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
            }
        }
        None => {
            let layer = fmt::layer().with_writer(std::io::stderr);
            if opts.self_timestamp {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
            }
        }
    }
    .context("logging already initialized")
}
