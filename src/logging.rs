//! Log sink for the application shell.
//!
//! The core crate logs through the `log` facade. This installs a
//! `tracing-subscriber` fmt subscriber that also receives those records.
//! Filter directives come from `VMPROV_LOG` (same syntax as `RUST_LOG`),
//! defaulting to `info`.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "VMPROV_LOG";
const DEFAULT_DIRECTIVES: &str = "info";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. Later calls are no-ops, and an already
/// installed subscriber (e.g. from an embedding application) is kept.
pub fn init_logging() {
    LOGGING_INIT.get_or_init(|| {
        let directives = std::env::var(LOG_ENV).ok();
        let result = tracing_subscriber::fmt()
            .with_env_filter(env_filter(directives.as_deref()))
            .with_target(true)
            .try_init();
        match result {
            Ok(()) => tracing::debug!(target: "vmprov::logging", "logging initialized"),
            Err(e) => tracing::debug!(target: "vmprov::logging", "keeping existing subscriber: {e}"),
        }
    });
}

/// Build the filter from `directives`, falling back to `info` when they
/// are missing, blank or unparsable.
pub fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}
