//! Default `Telemetry` implementation.

use std::sync::Arc;

use crate::envelope::Stage;
use crate::observability::metrics;
use crate::propagation::{ActiveTrace, Carrier};
use crate::telemetry::{Attributes, SpanExporter, Telemetry, TelemetryRecord};

/// Generates ids, codes carriers, and forwards records to an exporter.
#[derive(Clone)]
pub struct Tracer {
    service: String,
    exporter: Arc<dyn SpanExporter>,
}

impl Tracer {
    pub fn new(service: impl Into<String>, exporter: Arc<dyn SpanExporter>) -> Self {
        Self {
            service: service.into(),
            exporter,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Telemetry for Tracer {
    fn continue_or_start(&self, stage: Stage, carrier: Option<&Carrier>) -> ActiveTrace {
        let Some(carrier) = carrier else {
            return ActiveTrace::root(stage);
        };

        match carrier.decode() {
            Ok(carried) => ActiveTrace::child_of(stage, &carried),
            Err(e) => {
                tracing::warn!(
                    stage = %stage,
                    error = %e,
                    "Inbound trace carrier rejected, originating a new trace"
                );
                metrics::record_propagation_fallback(stage, e.reason());
                ActiveTrace::recovered(stage, e.reason())
            }
        }
    }

    fn insert_carrier(&self, trace: &ActiveTrace) -> Carrier {
        trace.outbound().encode()
    }

    fn record_attributes(&self, trace: &ActiveTrace, attributes: Attributes) {
        if attributes.is_empty() {
            return;
        }
        self.exporter
            .export(TelemetryRecord::attributes(&self.service, trace, attributes));
    }

    fn record_error(&self, trace: &ActiveTrace, error: &(dyn std::error::Error + 'static)) {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        tracing::error!(
            stage = %trace.stage(),
            trace_id = %trace.trace_id(),
            span_id = %trace.span_id(),
            error = %message,
            "Stage failed"
        );
        self.exporter
            .export(TelemetryRecord::error(&self.service, trace, message));
    }

    fn finish(&self, trace: ActiveTrace) {
        self.exporter.export(TelemetryRecord::span(&self.service, &trace));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::{TraceOrigin, TRACEPARENT};
    use crate::telemetry::MemoryExporter;

    fn tracer() -> (Tracer, MemoryExporter) {
        let exporter = MemoryExporter::new();
        (Tracer::new("test", Arc::new(exporter.clone())), exporter)
    }

    #[test]
    fn test_carrier_continues_at_next_hop() {
        let (tracer, _) = tracer();
        let upstream = tracer.continue_or_start(Stage::Ingress, None);
        let carrier = tracer.insert_carrier(&upstream);

        let downstream = tracer.continue_or_start(Stage::QueueRelay, Some(&carrier));
        assert_eq!(downstream.trace_id(), upstream.trace_id());
        assert_ne!(downstream.span_id(), upstream.span_id());
        assert_eq!(downstream.parent().unwrap().span_id, upstream.span_id());
    }

    #[test]
    fn test_insert_carrier_is_idempotent() {
        let (tracer, _) = tracer();
        let trace = tracer.continue_or_start(Stage::Compute, None);
        let first = tracer.insert_carrier(&trace);
        let second = tracer.insert_carrier(&trace);
        assert_eq!(first, second);

        let a = tracer.continue_or_start(Stage::StepA, Some(&first));
        let b = tracer.continue_or_start(Stage::StepA, Some(&second));
        assert_eq!(a.trace_id(), trace.trace_id());
        assert_eq!(b.trace_id(), trace.trace_id());
    }

    #[test]
    fn test_malformed_carrier_originates_fresh_trace() {
        let (tracer, exporter) = tracer();
        let mut carrier = Carrier::new();
        carrier.insert(TRACEPARENT, "00-not-a-trace-01");

        let trace = tracer.continue_or_start(Stage::QueueRelay, Some(&carrier));
        assert!(trace.parent().is_none());
        assert_eq!(trace.origin(), &TraceOrigin::Recovered { reason: "malformed" });
        assert!(exporter.errors().is_empty());
    }

    #[test]
    fn test_record_error_exports_once() {
        let (tracer, exporter) = tracer();
        let trace = tracer.continue_or_start(Stage::Compute, None);
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        tracer.record_error(&trace, &err);

        let errors = exporter.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span_id, trace.span_id().to_string());
        assert_eq!(errors[0].stage, Stage::Compute);
        assert!(errors[0].message.contains("deadline"));
    }

    #[test]
    fn test_empty_attributes_are_skipped() {
        let (tracer, exporter) = tracer();
        let trace = tracer.continue_or_start(Stage::StepA, None);
        tracer.record_attributes(&trace, Attributes::new());
        assert!(exporter.records().is_empty());

        tracer.finish(trace);
        assert_eq!(exporter.spans().len(), 1);
    }
}
