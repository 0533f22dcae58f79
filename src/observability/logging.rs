//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the binary
//! - Resolve the filter from `RUST_LOG` or the configured level
//!
//! The library itself only emits `tracing` events; without a subscriber
//! they are discarded.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` wins, then the configured level.
///
/// A bare level such as `debug` is scoped to this crate; anything else is
/// treated as a full filter directive.
pub fn env_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if is_bare_level(configured) {
            format!("http_connector={configured}")
        } else {
            configured.to_string()
        };
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("http_connector=info"))
    })
}

fn is_bare_level(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    )
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(configured: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(configured))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
