//! Exporter that writes records as structured log events.

use crate::telemetry::{SpanExporter, TelemetryRecord};

/// Emits every record on the `telemetry` log target.
#[derive(Debug, Clone, Default)]
pub struct LogExporter;

impl LogExporter {
    pub fn new() -> Self {
        Self
    }
}

impl SpanExporter for LogExporter {
    fn export(&self, record: TelemetryRecord) {
        match &record {
            TelemetryRecord::Attributes {
                stage,
                trace_id,
                span_id,
                attributes,
                ..
            } => {
                let attributes = serde_json::to_string(attributes).unwrap_or_default();
                tracing::info!(
                    target: "telemetry",
                    stage = %stage,
                    trace_id = %trace_id,
                    span_id = %span_id,
                    attributes = %attributes,
                    "attributes"
                );
            }
            TelemetryRecord::Error(e) => {
                tracing::warn!(
                    target: "telemetry",
                    stage = %e.stage,
                    trace_id = %e.trace_id,
                    span_id = %e.span_id,
                    message = %e.message,
                    "error"
                );
            }
            TelemetryRecord::Span(s) => {
                tracing::info!(
                    target: "telemetry",
                    service = %s.service,
                    stage = %s.stage,
                    trace_id = %s.trace_id,
                    span_id = %s.span_id,
                    parent_span_id = ?s.parent_span_id,
                    duration_ms = s.duration_ms,
                    "span finished"
                );
            }
        }
    }
}
