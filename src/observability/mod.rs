//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All stages produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (stage counters, latency histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! Trace records (spans, attributes, errors) are a separate concern and live
//! in `crate::telemetry`.

pub mod logging;
pub mod metrics;
