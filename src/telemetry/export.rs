//! Records handed to the telemetry backend.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::envelope::Stage;
use crate::propagation::ActiveTrace;
use crate::telemetry::Attributes;

/// A closed span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedSpan {
    pub service: String,
    pub stage: Stage,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub sampled: bool,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
}

/// An error event attributed to a span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub service: String,
    pub stage: Stage,
    pub trace_id: String,
    pub span_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything an exporter may receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Attributes {
        service: String,
        stage: Stage,
        trace_id: String,
        span_id: String,
        attributes: Attributes,
    },
    Error(ErrorRecord),
    Span(FinishedSpan),
}

impl TelemetryRecord {
    pub fn trace_id(&self) -> &str {
        match self {
            TelemetryRecord::Attributes { trace_id, .. } => trace_id,
            TelemetryRecord::Error(e) => &e.trace_id,
            TelemetryRecord::Span(s) => &s.trace_id,
        }
    }

    pub fn span_id(&self) -> &str {
        match self {
            TelemetryRecord::Attributes { span_id, .. } => span_id,
            TelemetryRecord::Error(e) => &e.span_id,
            TelemetryRecord::Span(s) => &s.span_id,
        }
    }

    pub(crate) fn attributes(service: &str, trace: &ActiveTrace, attributes: Attributes) -> Self {
        TelemetryRecord::Attributes {
            service: service.to_string(),
            stage: trace.stage(),
            trace_id: trace.trace_id().to_string(),
            span_id: trace.span_id().to_string(),
            attributes,
        }
    }

    pub(crate) fn error(service: &str, trace: &ActiveTrace, message: String) -> Self {
        TelemetryRecord::Error(ErrorRecord {
            service: service.to_string(),
            stage: trace.stage(),
            trace_id: trace.trace_id().to_string(),
            span_id: trace.span_id().to_string(),
            message,
            timestamp: Utc::now(),
        })
    }

    pub(crate) fn span(service: &str, trace: &ActiveTrace) -> Self {
        TelemetryRecord::Span(FinishedSpan {
            service: service.to_string(),
            stage: trace.stage(),
            trace_id: trace.trace_id().to_string(),
            span_id: trace.span_id().to_string(),
            parent_span_id: trace.parent().map(|p| p.span_id.to_string()),
            sampled: trace.sampled(),
            start_time: trace.started_at(),
            duration_ms: u64::try_from(trace.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Receives finished telemetry. Implementations must not block.
pub trait SpanExporter: Send + Sync {
    fn export(&self, record: TelemetryRecord);
}
