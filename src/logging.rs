//! Logging initialization and configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor a configured level is present.
const DEFAULT_FILTER: &str = "rpc_tunnel=info";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system.
///
/// Uses the `RUST_LOG` environment variable for filtering. If not set,
/// defaults to `rpc_tunnel=info`.
///
/// # Panics
///
/// Panics if called more than once, or if another tracing subscriber
/// has already been set.
pub fn init() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}

/// Initialize logging with an explicit filter, e.g. a configured level.
///
/// A bare level such as `debug` is scoped to this crate; anything else is
/// treated as a full filter directive. Invalid directives fall back to the
/// default filter.
pub fn init_with_filter(filter: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(parse_filter(filter))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}

fn parse_filter(filter: &str) -> EnvFilter {
    let directive = match filter.trim() {
        level @ ("error" | "warn" | "info" | "debug" | "trace") => {
            format!("rpc_tunnel={}", level)
        }
        other => other.to_string(),
    };
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_idempotent() {
        // Whichever test runs first wins; later calls must not panic.
        let _ = try_init();
        let _ = try_init();
    }

    #[test]
    fn test_init_with_filter_does_not_panic() {
        let _ = init_with_filter("debug");
        let _ = init_with_filter("rpc_tunnel=trace,tower_http=info");
        tracing::info!("test info message");
        tracing::warn!("test warn message");
    }

    #[test]
    fn test_parse_filter_scopes_bare_level() {
        let filter = parse_filter("debug");
        assert_eq!(filter.to_string(), "rpc_tunnel=debug");
    }

    #[test]
    fn test_parse_filter_invalid_falls_back() {
        let filter = parse_filter("rpc_tunnel=notalevel");
        assert_eq!(filter.to_string(), DEFAULT_FILTER);
    }
}
