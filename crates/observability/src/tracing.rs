//! Tracing/logging initialization.
//!
//! Job lifecycle events carry `job_id`, `queue`, `display_class` and `phase`
//! fields, so JSON output is the default.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVES: &str = "info";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(DEFAULT_DIRECTIVES);
}

/// Like [`init`], with a caller-chosen fallback filter (e.g. `deferq_delay=debug`).
pub fn init_with(default_directives: &str) {
    let filter = filter_from(
        std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(),
        default_directives,
    );

    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Build the filter from raw `RUST_LOG` contents, falling back to `default_directives`.
pub fn filter_from(raw: Option<&str>, default_directives: &str) -> EnvFilter {
    raw.filter(|r| !r.trim().is_empty())
        .and_then(|r| EnvFilter::try_new(r).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives))
}
