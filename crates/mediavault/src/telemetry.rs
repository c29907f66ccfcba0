//! Tracing initialization shared by binaries and tests.

use tracing_subscriber::EnvFilter;

/// Installs a global tracing subscriber with an env-derived filter,
/// bridging `log` records into tracing. Safe to call more than once;
/// later calls are no-ops.
pub fn init() {
    init_with_filter("info");
}

/// Same as [`init`] but with an explicit default filter directive used
/// when `RUST_LOG` is unset.
pub fn init_with_filter(default_filter: &str) {
    let _ = tracing_log::LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init_with_filter("debug");
    }
}
