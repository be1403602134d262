//! Process-wide tracing subscriber.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `--log-level` nor `RUST_LOG` is usable.
pub const DEFAULT_FILTER: &str = "info";

/// `level` if given, else `RUST_LOG`, else [`DEFAULT_FILTER`].
pub fn env_filter(level: Option<&str>) -> Result<EnvFilter> {
    match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("log level {level}")),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install the global subscriber. Logs go to stderr; stdout carries the summary.
pub fn init(level: Option<&str>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level)?)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("install tracing subscriber: {e}"))
}
