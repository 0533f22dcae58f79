//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! controller / acceptor / connections produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout via the fmt layer
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
