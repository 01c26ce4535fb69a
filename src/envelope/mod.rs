//! The payload passed hop to hop.
//!
//! # Data Flow
//! ```text
//! ingress request body
//!     → Envelope (caller fields kept verbatim in `passthrough`)
//!     → each stage: clone, record its own result slot, hand_off()
//!     → step B: trace_chain() + total_processing_time(), complete()
//! ```
//!
//! # Invariants
//! - Result slots are filled at most once; refilling is an error
//! - Passthrough fields are never removed or rewritten
//! - Only `parentTraceId`, `parentSpanId` and `propagationCarrier` change per hop

pub mod lineage;
pub mod results;
pub mod stage;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::propagation::{ActiveTrace, Carrier};

pub use lineage::ChainLink;
pub use results::{ComputeResult, IngressResult, QueueRelayResult, StageResult, StepResult};
pub use stage::Stage;

/// Status written by the terminal stage.
pub const STATUS_COMPLETED: &str = "completed";

const PARENT_TRACE_ID: &str = "parentTraceId";
const PARENT_SPAN_ID: &str = "parentSpanId";
const PROPAGATION_CARRIER: &str = "propagationCarrier";
const FINAL_STATUS: &str = "finalStatus";
const TOTAL_PROCESSING_TIME: &str = "totalProcessingTime";
const TRACE_CHAIN: &str = "traceChain";

/// Field names owned by the pipeline; caller fields never use them.
pub const RESERVED_FIELDS: [&str; 11] = [
    PARENT_TRACE_ID,
    PARENT_SPAN_ID,
    "ingressResult",
    "queueRelayResult",
    "computeResult",
    "stepAResult",
    "stepBResult",
    PROPAGATION_CARRIER,
    FINAL_STATUS,
    TOTAL_PROCESSING_TIME,
    TRACE_CHAIN,
];

/// Violations of the append-only envelope contract.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("{} already recorded", .stage.result_field())]
    SlotOccupied { stage: Stage },

    #[error("envelope lost or rewrote '{field}' present in its predecessor")]
    Regressed { field: String },

    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// An inbound body that cannot be used as an envelope.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("payload is JSON but not an object")]
    NotAnObject,
}

/// Accumulating, append-only pipeline payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    ingress_result: Option<IngressResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    queue_relay_result: Option<QueueRelayResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    compute_result: Option<ComputeResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    step_a_result: Option<StepResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    step_b_result: Option<StepResult>,

    /// Carrier for the next hop, replaced by every stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    propagation_carrier: Option<Carrier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_processing_time: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_chain: Option<Vec<ChainLink>>,

    /// Caller-supplied fields, opaque to the pipeline.
    #[serde(flatten)]
    passthrough: Map<String, Value>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap caller-supplied fields.
    pub fn from_passthrough(passthrough: Map<String, Value>) -> Self {
        Self {
            passthrough,
            ..Self::default()
        }
    }

    /// Strictly parse a JSON object into an envelope.
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(raw).map_err(PayloadError::InvalidJson)?;
        if !value.is_object() {
            return Err(PayloadError::NotAnObject);
        }
        serde_json::from_value(value).map_err(PayloadError::InvalidJson)
    }

    /// Parse a body handed over by the previous stage, substituting a
    /// placeholder only when the body is not a JSON object.
    ///
    /// Empty or missing bodies yield an empty envelope.
    pub fn parse_lenient(stage: Stage, raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Self::new();
        };

        match object(raw) {
            Ok(object) => Self::from_object(stage, object),
            Err(e) => {
                tracing::warn!(
                    stage = %stage,
                    error = %e,
                    "Unparseable payload, continuing with placeholder"
                );
                Self::placeholder(raw)
            }
        }
    }

    /// Build the first envelope from a caller's request body.
    ///
    /// Every caller field passes through untouched except the reserved
    /// envelope fields, which belong to the pipeline. A body
    /// `propagationCarrier` is kept as the inbound carrier.
    pub fn from_request_body(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Self::new();
        };

        let mut object = match object(raw) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(
                    stage = %Stage::Ingress,
                    error = %e,
                    "Unparseable request body, continuing with placeholder"
                );
                return Self::placeholder(raw);
            }
        };

        let carrier = take_carrier(Stage::Ingress, &mut object);
        let dropped: Vec<String> = RESERVED_FIELDS
            .iter()
            .filter_map(|field| object.remove(*field).map(|_| field.to_string()))
            .collect();
        if !dropped.is_empty() {
            tracing::warn!(
                stage = %Stage::Ingress,
                fields = ?dropped,
                "Ignoring reserved envelope fields in request body"
            );
        }

        Self {
            propagation_carrier: carrier,
            ..Self::from_passthrough(object)
        }
    }

    /// Accept an already-decoded workflow state input, substituting a
    /// placeholder when it is not an envelope object.
    pub fn from_state_lenient(stage: Stage, input: Value) -> Self {
        match input {
            Value::Object(object) => Self::from_object(stage, object),
            other => {
                tracing::warn!(stage = %stage, "State input is not an object, continuing with placeholder");
                Self::placeholder(&other.to_string())
            }
        }
    }

    /// Decode an envelope field by field.
    ///
    /// A reserved field that does not decode is dropped with a warning; every
    /// other field, and every other stage's result, is kept.
    pub fn from_object(stage: Stage, mut object: Map<String, Value>) -> Self {
        Self {
            parent_trace_id: take_field(stage, &mut object, PARENT_TRACE_ID),
            parent_span_id: take_field(stage, &mut object, PARENT_SPAN_ID),
            ingress_result: take_field(stage, &mut object, Stage::Ingress.result_field()),
            queue_relay_result: take_field(stage, &mut object, Stage::QueueRelay.result_field()),
            compute_result: take_field(stage, &mut object, Stage::Compute.result_field()),
            step_a_result: take_field(stage, &mut object, Stage::StepA.result_field()),
            step_b_result: take_field(stage, &mut object, Stage::StepB.result_field()),
            propagation_carrier: take_carrier(stage, &mut object),
            final_status: take_field(stage, &mut object, FINAL_STATUS),
            total_processing_time: take_field(stage, &mut object, TOTAL_PROCESSING_TIME),
            trace_chain: take_field(stage, &mut object, TRACE_CHAIN),
            passthrough: object,
        }
    }

    /// Minimal envelope standing in for an unusable body.
    pub fn placeholder(raw: &str) -> Self {
        let mut passthrough = Map::new();
        passthrough.insert("message".to_string(), Value::String(raw.to_string()));
        Self::from_passthrough(passthrough)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<Value, EnvelopeError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn passthrough(&self) -> &Map<String, Value> {
        &self.passthrough
    }

    /// Carrier left by the previous hop, if any.
    pub fn carrier(&self) -> Option<&Carrier> {
        self.propagation_carrier.as_ref()
    }

    pub fn ingress_result(&self) -> Option<&IngressResult> {
        self.ingress_result.as_ref()
    }

    pub fn queue_relay_result(&self) -> Option<&QueueRelayResult> {
        self.queue_relay_result.as_ref()
    }

    pub fn compute_result(&self) -> Option<&ComputeResult> {
        self.compute_result.as_ref()
    }

    pub fn step_a_result(&self) -> Option<&StepResult> {
        self.step_a_result.as_ref()
    }

    pub fn step_b_result(&self) -> Option<&StepResult> {
        self.step_b_result.as_ref()
    }

    pub fn final_status(&self) -> Option<&str> {
        self.final_status.as_deref()
    }

    pub fn recorded_total_processing_time(&self) -> Option<u64> {
        self.total_processing_time
    }

    pub fn recorded_trace_chain(&self) -> Option<&[ChainLink]> {
        self.trace_chain.as_deref()
    }

    /// The result a stage left behind, as its common identity view.
    pub fn result(&self, stage: Stage) -> Option<&dyn StageResult> {
        match stage {
            Stage::Ingress => self.ingress_result.as_ref().map(|r| r as &dyn StageResult),
            Stage::QueueRelay => self.queue_relay_result.as_ref().map(|r| r as &dyn StageResult),
            Stage::Compute => self.compute_result.as_ref().map(|r| r as &dyn StageResult),
            Stage::StepA => self.step_a_result.as_ref().map(|r| r as &dyn StageResult),
            Stage::StepB => self.step_b_result.as_ref().map(|r| r as &dyn StageResult),
        }
    }

    /// Stages whose result slot is filled, in pipeline order.
    pub fn recorded_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.result(*stage).is_some())
            .collect()
    }

    pub fn record_ingress(&mut self, result: IngressResult) -> Result<(), EnvelopeError> {
        fill(&mut self.ingress_result, Stage::Ingress, result)
    }

    pub fn record_queue_relay(&mut self, result: QueueRelayResult) -> Result<(), EnvelopeError> {
        fill(&mut self.queue_relay_result, Stage::QueueRelay, result)
    }

    pub fn record_compute(&mut self, result: ComputeResult) -> Result<(), EnvelopeError> {
        fill(&mut self.compute_result, Stage::Compute, result)
    }

    pub fn record_step_a(&mut self, result: StepResult) -> Result<(), EnvelopeError> {
        fill(&mut self.step_a_result, Stage::StepA, result)
    }

    pub fn record_step_b(&mut self, result: StepResult) -> Result<(), EnvelopeError> {
        fill(&mut self.step_b_result, Stage::StepB, result)
    }

    /// Stamp the handing-off stage's identity and the carrier for the next hop.
    pub fn hand_off(&mut self, trace: &ActiveTrace, carrier: Carrier) {
        self.parent_trace_id = Some(trace.trace_id().to_string());
        self.parent_span_id = Some(trace.span_id().to_string());
        self.propagation_carrier = Some(carrier);
    }

    /// Write the terminal summary. Only the final stage calls this.
    pub fn complete(&mut self, total_processing_time: u64, trace_chain: Vec<ChainLink>) {
        self.final_status = Some(STATUS_COMPLETED.to_string());
        self.total_processing_time = Some(total_processing_time);
        self.trace_chain = Some(trace_chain);
    }

    /// Check that this envelope keeps every slot and passthrough field of `predecessor`.
    pub fn verify_extends(&self, predecessor: &Envelope) -> Result<(), EnvelopeError> {
        retained(Stage::Ingress, &predecessor.ingress_result, &self.ingress_result)?;
        retained(
            Stage::QueueRelay,
            &predecessor.queue_relay_result,
            &self.queue_relay_result,
        )?;
        retained(Stage::Compute, &predecessor.compute_result, &self.compute_result)?;
        retained(Stage::StepA, &predecessor.step_a_result, &self.step_a_result)?;
        retained(Stage::StepB, &predecessor.step_b_result, &self.step_b_result)?;

        for (key, value) in &predecessor.passthrough {
            if self.passthrough.get(key) != Some(value) {
                return Err(EnvelopeError::Regressed { field: key.clone() });
            }
        }
        Ok(())
    }
}

fn object(raw: &str) -> Result<Map<String, Value>, PayloadError> {
    match serde_json::from_str(raw).map_err(PayloadError::InvalidJson)? {
        Value::Object(object) => Ok(object),
        _ => Err(PayloadError::NotAnObject),
    }
}

fn take_field<T: DeserializeOwned>(
    stage: Stage,
    object: &mut Map<String, Value>,
    field: &str,
) -> Option<T> {
    let value = object.remove(field).filter(|v| !v.is_null())?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(stage = %stage, field, error = %e, "Dropping unreadable envelope field");
            None
        }
    }
}

fn take_carrier(stage: Stage, object: &mut Map<String, Value>) -> Option<Carrier> {
    let value = object.remove(PROPAGATION_CARRIER).filter(|v| !v.is_null())?;
    let carrier = Carrier::from_value_lenient(&value);
    if carrier.is_empty() {
        tracing::warn!(stage = %stage, "Envelope carrier has no usable entries");
    }
    Some(carrier)
}

fn fill<T>(slot: &mut Option<T>, stage: Stage, value: T) -> Result<(), EnvelopeError> {
    if slot.is_some() {
        return Err(EnvelopeError::SlotOccupied { stage });
    }
    *slot = Some(value);
    Ok(())
}

fn retained<T: PartialEq>(
    stage: Stage,
    before: &Option<T>,
    after: &Option<T>,
) -> Result<(), EnvelopeError> {
    match (before, after) {
        (Some(b), Some(a)) if a == b => Ok(()),
        (Some(_), _) => Err(EnvelopeError::Regressed {
            field: stage.result_field().to_string(),
        }),
        (None, _) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn step(trace_id: &str, processing_time: u64) -> StepResult {
        StepResult {
            trace_id: trace_id.to_string(),
            span_id: "00f067aa0ba902b7".to_string(),
            processed: true,
            processing_time,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_passthrough_survives_roundtrip() {
        let raw = r#"{"message":"hi","nested":{"a":[1,2,3]},"count":7}"#;
        let envelope = Envelope::parse(raw).unwrap();
        assert_eq!(envelope.passthrough()["message"], "hi");

        let again = Envelope::parse(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(again, envelope);
    }

    #[test]
    fn test_slots_are_append_only() {
        let mut envelope = Envelope::new();
        envelope.record_step_a(step("a", 100)).unwrap();

        let err = envelope.record_step_a(step("b", 1)).unwrap_err();
        assert!(matches!(err, EnvelopeError::SlotOccupied { stage: Stage::StepA }));
        assert_eq!(envelope.step_a_result().unwrap().trace_id, "a");
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let mut envelope = Envelope::new();
        envelope.record_step_a(step("a", 100)).unwrap();
        envelope.parent_trace_id = Some("t".to_string());

        let value = envelope.to_value().unwrap();
        assert!(value.get("stepAResult").is_some());
        assert_eq!(value["stepAResult"]["processingTime"], 100);
        assert_eq!(value["parentTraceId"], "t");
        assert!(value.get("stepBResult").is_none());
    }

    #[test]
    fn test_lenient_parse_substitutes_placeholder() {
        let envelope = Envelope::parse_lenient(Stage::Ingress, Some("not json"));
        assert_eq!(envelope.passthrough()["message"], "not json");

        let envelope = Envelope::parse_lenient(Stage::Ingress, Some("[1,2]"));
        assert_eq!(envelope.passthrough()["message"], "[1,2]");

        assert_eq!(Envelope::parse_lenient(Stage::Ingress, None), Envelope::new());
        assert_eq!(Envelope::parse_lenient(Stage::Ingress, Some("  ")), Envelope::new());
    }

    #[test]
    fn test_state_input_fallbacks() {
        let envelope =
            Envelope::from_state_lenient(Stage::StepA, serde_json::json!({ "message": "hi" }));
        assert_eq!(envelope.passthrough()["message"], "hi");

        let envelope = Envelope::from_state_lenient(Stage::StepA, serde_json::json!("plain"));
        assert_eq!(envelope.passthrough()["message"], "\"plain\"");

        let envelope = Envelope::from_state_lenient(
            Stage::StepB,
            serde_json::json!({ "message": "hi", "stepAResult": "not a result" }),
        );
        assert!(envelope.step_a_result().is_none());
        assert_eq!(envelope.passthrough()["message"], "hi");
        assert!(!envelope.passthrough().contains_key("stepAResult"));
    }

    #[test]
    fn test_misshaped_carrier_keeps_prior_slots() {
        let mut before = Envelope::parse(r#"{"message":"hi","customer":{"id":42}}"#).unwrap();
        before.record_step_a(step("a", 100)).unwrap();
        before.parent_trace_id = Some("a".to_string());

        for carrier in [
            serde_json::json!({ "traceparent": 5 }),
            serde_json::json!("x"),
            serde_json::json!([1, 2]),
        ] {
            let mut value = before.to_value().unwrap();
            value["propagationCarrier"] = carrier;

            let raw = value.to_string();
            let parsed = Envelope::parse_lenient(Stage::StepB, Some(&raw));
            let from_state = Envelope::from_state_lenient(Stage::StepB, value);

            for envelope in [parsed, from_state] {
                envelope.verify_extends(&before).unwrap();
                assert_eq!(envelope.step_a_result(), before.step_a_result());
                assert_eq!(envelope.parent_trace_id.as_deref(), Some("a"));
                assert!(envelope.carrier().unwrap().decode().is_err());
            }
        }
    }

    #[test]
    fn test_misshaped_field_is_dropped_alone() {
        let raw = r#"{"message":"hi","parentTraceId":42,"totalProcessingTime":"soon","stepAResult":{"traceId":"a","spanId":"b","processed":true,"processingTime":100,"timestamp":"2024-01-01T00:00:00Z"}}"#;
        let envelope = Envelope::parse_lenient(Stage::StepB, Some(raw));

        assert_eq!(envelope.passthrough()["message"], "hi");
        assert_eq!(envelope.parent_trace_id, None);
        assert_eq!(envelope.recorded_total_processing_time(), None);
        assert_eq!(envelope.step_a_result().unwrap().processing_time, 100);
    }

    #[test]
    fn test_request_body_keeps_caller_fields() {
        let raw = r#"{"message":"hi","parentTraceId":42,"ingressResult":{"bogus":true},"propagationCarrier":{"traceparent":"00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"}}"#;
        let envelope = Envelope::from_request_body(Some(raw));

        assert_eq!(envelope.passthrough().len(), 1);
        assert_eq!(envelope.passthrough()["message"], "hi");
        assert_eq!(envelope.parent_trace_id, None);
        assert!(envelope.ingress_result().is_none());
        assert!(envelope.carrier().unwrap().decode().is_ok());

        let envelope = Envelope::from_request_body(Some("plain text"));
        assert_eq!(envelope.passthrough()["message"], "plain text");
        assert_eq!(Envelope::from_request_body(None), Envelope::new());
    }

    #[test]
    fn test_verify_extends_detects_regressions() {
        let mut before = Envelope::parse(r#"{"message":"hi"}"#).unwrap();
        before.record_step_a(step("a", 100)).unwrap();

        let mut after = before.clone();
        after.record_step_b(step("a", 200)).unwrap();
        after.verify_extends(&before).unwrap();

        let stripped = Envelope::parse(r#"{"message":"hi"}"#).unwrap();
        assert!(matches!(
            stripped.verify_extends(&before),
            Err(EnvelopeError::Regressed { field }) if field == "stepAResult"
        ));

        let rewritten = Envelope::parse(r#"{"message":"bye"}"#).unwrap();
        assert!(rewritten.verify_extends(&Envelope::parse(r#"{"message":"hi"}"#).unwrap()).is_err());
    }

    #[test]
    fn test_recorded_stages_in_order() {
        let mut envelope = Envelope::new();
        envelope.record_step_b(step("b", 200)).unwrap();
        envelope.record_step_a(step("a", 100)).unwrap();
        assert_eq!(envelope.recorded_stages(), vec![Stage::StepA, Stage::StepB]);
    }
}
