//! Trace context propagation across a five-stage pipeline:
//! ingress → queue relay → compute → workflow step A → workflow step B.

pub mod config;
pub mod envelope;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod propagation;
pub mod resilience;
pub mod stages;
pub mod telemetry;
pub mod transport;

pub use config::PipelineConfig;
pub use envelope::{Envelope, Stage};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{LocalPipeline, Workers};
pub use telemetry::Telemetry;
