//! Per-stage result records appended to the envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity every stage result carries.
pub trait StageResult {
    fn trace_id(&self) -> &str;
    fn span_id(&self) -> &str;
}

/// Appended by the ingress stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressResult {
    pub trace_id: String,
    pub span_id: String,
    pub request_id: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Appended by the queue relay stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRelayResult {
    pub trace_id: String,
    pub span_id: String,
    pub message_id: String,
    pub job_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Appended by the compute stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResult {
    pub trace_id: String,
    pub span_id: String,
    pub result: f64,
    pub computation: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Appended by each workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub trace_id: String,
    pub span_id: String,
    pub processed: bool,
    /// Milliseconds of work the step recorded.
    pub processing_time: u64,
    pub timestamp: DateTime<Utc>,
}

macro_rules! impl_stage_result {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StageResult for $ty {
                fn trace_id(&self) -> &str {
                    &self.trace_id
                }

                fn span_id(&self) -> &str {
                    &self.span_id
                }
            }
        )*
    };
}

impl_stage_result!(IngressResult, QueueRelayResult, ComputeResult, StepResult);
