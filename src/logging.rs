//! Structured logging setup.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Parses `directives`, falling back to [`DEFAULT_LOG_FILTER`] when absent or invalid.
#[must_use]
pub fn build_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global stderr subscriber. Returns `false` when one was already set.
pub fn init(directives: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(directives))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
