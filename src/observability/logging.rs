//! Structured logging.
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Initialization is idempotent so tests and the CLI can call it freely

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor config set one.
pub const DEFAULT_FILTER: &str = "render_edge=info,tower_http=info";

/// Build the filter directive for a configured level such as `debug`.
pub fn filter_for_level(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        return DEFAULT_FILTER.to_string();
    }
    if level.contains('=') {
        return level.to_string();
    }
    format!("render_edge={level},tower_http={level}")
}

/// Install the global subscriber.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for_level(level)));

    // A second init (tests, CLI reuse) is not an error worth reporting.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_for_level() {
        assert_eq!(filter_for_level(""), DEFAULT_FILTER);
        assert_eq!(filter_for_level("debug"), "render_edge=debug,tower_http=debug");
        assert_eq!(filter_for_level("render_edge=trace"), "render_edge=trace");
    }
}
