//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, request id as a span field)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Metric names are prefixed `edge_` and recorded through free functions
//! - Recording is a no-op until an exporter is installed, so tests need no setup

pub mod logging;
pub mod metrics;
