//! Telemetry capability injected into every stage.
//!
//! # Data Flow
//! ```text
//! stage handler
//!     → Telemetry (continue_or_start / insert_carrier / record_* / finish)
//!     → tracer.rs (ids, carrier codec, lifecycle logging)
//!     → SpanExporter (log.rs | http.rs → otlp.rs | memory.rs)
//! ```
//!
//! # Design Decisions
//! - Passed explicitly as `Arc<dyn Telemetry>`; there is no global tracer
//! - Propagation failures are absorbed here and never reach the stage
//! - Exporters are fire-and-forget; a slow backend never blocks a stage

pub mod export;
pub mod http;
pub mod log;
pub mod memory;
pub mod otlp;
pub mod tracer;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ExporterKind, TelemetryConfig};
use crate::envelope::Stage;
use crate::propagation::{ActiveTrace, Carrier};

pub use export::{ErrorRecord, FinishedSpan, SpanExporter, TelemetryRecord};
pub use http::HttpExporter;
pub use log::LogExporter;
pub use memory::MemoryExporter;
pub use otlp::OtlpBatch;
pub use tracer::Tracer;

/// Abstract tracing API the pipeline depends on.
pub trait Telemetry: Send + Sync {
    /// Continue the carried trace, or originate one when the carrier is absent or unusable.
    fn continue_or_start(&self, stage: Stage, carrier: Option<&Carrier>) -> ActiveTrace;

    /// Serialize the active span for the next hop. Idempotent.
    fn insert_carrier(&self, trace: &ActiveTrace) -> Carrier;

    /// Attach custom attributes to the active span.
    fn record_attributes(&self, trace: &ActiveTrace, attributes: Attributes);

    /// Record an error event against the active span.
    fn record_error(&self, trace: &ActiveTrace, error: &(dyn std::error::Error + 'static));

    /// Close the span and hand it to the backend.
    fn finish(&self, trace: ActiveTrace);
}

/// A single custom attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// Ordered set of custom attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    /// String value of `key`, if it is a string attribute.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AttributeValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Errors building the telemetry backend.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("http exporter requires telemetry.endpoint")]
    MissingEndpoint,

    #[error("failed to build exporter client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Build the exporter selected in configuration.
///
/// The http exporter spawns its batching task, so this must run inside a Tokio runtime.
pub fn build_exporter(config: &TelemetryConfig) -> Result<Arc<dyn SpanExporter>, TelemetryError> {
    let exporter: Arc<dyn SpanExporter> = match config.exporter {
        ExporterKind::Log => Arc::new(LogExporter::new()),
        ExporterKind::Memory => Arc::new(MemoryExporter::new()),
        ExporterKind::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or(TelemetryError::MissingEndpoint)?;
            Arc::new(HttpExporter::spawn(endpoint, config)?)
        }
    };
    Ok(exporter)
}

/// Build the default telemetry capability from configuration.
pub fn build(config: &TelemetryConfig) -> Result<Arc<dyn Telemetry>, TelemetryError> {
    let exporter = build_exporter(config)?;
    Ok(Arc::new(Tracer::new(config.service_name.clone(), exporter)))
}
