//! OTLP encoding of telemetry records.
//!
//! Attribute and error records are held per span id until the span itself
//! finishes, then folded into one OTLP span: attributes become span
//! attributes, errors become `exception` events plus an error status.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::{Event, SpanKind};
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status};

use crate::envelope::Stage;
use crate::propagation::{SpanId, TraceId};
use crate::telemetry::{AttributeValue, Attributes, ErrorRecord, FinishedSpan, TelemetryRecord};

const EXCEPTION_EVENT: &str = "exception";
const EXCEPTION_MESSAGE: &str = "exception.message";

#[derive(Default)]
struct PendingSpan {
    attributes: Vec<KeyValue>,
    events: Vec<Event>,
    error: Option<String>,
}

/// Accumulates records into finished OTLP spans, grouped by service.
#[derive(Default)]
pub struct OtlpBatch {
    pending: HashMap<String, PendingSpan>,
    ready: Vec<(String, Span)>,
}

impl OtlpBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TelemetryRecord) {
        match record {
            TelemetryRecord::Attributes {
                span_id,
                attributes,
                ..
            } => {
                let pending = self.pending.entry(span_id).or_default();
                pending.attributes.extend(key_values(&attributes));
            }
            TelemetryRecord::Error(error) => {
                let pending = self.pending.entry(error.span_id.clone()).or_default();
                pending.events.push(exception_event(&error));
                pending.error = Some(error.message);
            }
            TelemetryRecord::Span(finished) => {
                let pending = self.pending.remove(&finished.span_id).unwrap_or_default();
                let service = finished.service.clone();
                self.ready.push((service, otlp_span(finished, pending)));
            }
        }
    }

    /// Spans ready to export.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Spans whose attributes or errors arrived but which have not finished yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain finished spans into one export request, if there are any.
    pub fn take_request(&mut self) -> Option<ExportTraceServiceRequest> {
        if self.ready.is_empty() {
            return None;
        }

        let mut by_service: Vec<(String, Vec<Span>)> = Vec::new();
        for (service, span) in self.ready.drain(..) {
            match by_service.iter_mut().find(|(s, _)| *s == service) {
                Some((_, spans)) => spans.push(span),
                None => by_service.push((service, vec![span])),
            }
        }

        let resource_spans = by_service
            .into_iter()
            .map(|(service, spans)| ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![key_value("service.name", string_value(service))],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                        ..Default::default()
                    }),
                    spans,
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect();

        Some(ExportTraceServiceRequest { resource_spans })
    }
}

fn otlp_span(finished: FinishedSpan, pending: PendingSpan) -> Span {
    let start = unix_nanos(finished.start_time);
    let end = start.saturating_add(finished.duration_ms.saturating_mul(1_000_000));

    Span {
        trace_id: trace_id_bytes(&finished.trace_id),
        span_id: span_id_bytes(&finished.span_id),
        parent_span_id: finished
            .parent_span_id
            .as_deref()
            .map(span_id_bytes)
            .unwrap_or_default(),
        flags: u32::from(finished.sampled),
        name: finished.stage.as_str().to_string(),
        kind: span_kind(finished.stage) as i32,
        start_time_unix_nano: start,
        end_time_unix_nano: end,
        attributes: pending.attributes,
        events: pending.events,
        status: pending.error.map(|message| Status {
            message,
            code: StatusCode::Error as i32,
        }),
        ..Default::default()
    }
}

fn span_kind(stage: Stage) -> SpanKind {
    match stage {
        Stage::Ingress => SpanKind::Server,
        Stage::QueueRelay | Stage::Compute => SpanKind::Consumer,
        Stage::StepA | Stage::StepB => SpanKind::Internal,
    }
}

fn exception_event(error: &ErrorRecord) -> Event {
    Event {
        time_unix_nano: unix_nanos(error.timestamp),
        name: EXCEPTION_EVENT.to_string(),
        attributes: vec![key_value(EXCEPTION_MESSAGE, string_value(error.message.clone()))],
        ..Default::default()
    }
}

fn key_values(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
                AttributeValue::Int(i) => any_value::Value::IntValue(*i),
                AttributeValue::Float(f) => any_value::Value::DoubleValue(*f),
                AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
            };
            key_value(key, value)
        })
        .collect()
}

fn key_value(key: &str, value: any_value::Value) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

fn string_value(s: String) -> any_value::Value {
    any_value::Value::StringValue(s)
}

fn unix_nanos(at: DateTime<Utc>) -> u64 {
    at.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

// Ids reach the exporter as the hex strings the tracer produced; an id that
// does not parse is exported empty and the collector drops the span.
fn trace_id_bytes(hex: &str) -> Vec<u8> {
    hex.parse::<TraceId>()
        .map(|id| id.as_u128().to_be_bytes().to_vec())
        .unwrap_or_default()
}

fn span_id_bytes(hex: &str) -> Vec<u8> {
    hex.parse::<SpanId>()
        .map(|id| id.as_u64().to_be_bytes().to_vec())
        .unwrap_or_default()
}
