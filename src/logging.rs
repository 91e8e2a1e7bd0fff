//! `tracing-subscriber` setup.
//!
//! Logs go to stderr so stdout carries only command output. `RUST_LOG`
//! takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

/// Build the filter for `level`, quieting the HTTP stack below `warn`.
pub fn build_env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let mut directives = vec![level.to_lowercase()];
    for (target, lvl) in [("hyper", "warn"), ("h2", "warn"), ("rmcp", "info")] {
        directives.push(format!("{}={}", target, lvl));
    }
    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{}': {}", filter_str, e))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_env_filter(level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
    Ok(())
}
