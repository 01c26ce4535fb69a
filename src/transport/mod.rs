//! Downstream transport capabilities.
//!
//! # Data Flow
//! ```text
//! ingress    → QueueTransport::enqueue(body, attributes)      → MessageId
//! queue relay→ JobSubmitter::submit_job(JobSubmission)        → JobReceipt
//! compute    → WorkflowStarter::start_execution(ref, input, name) → ExecutionReceipt
//! ```
//!
//! # Design Decisions
//! - Narrow, object-safe traits; stages hold them as `Arc<dyn _>`
//! - Transport references (queue url, job queue, state machine) are opaque strings
//! - Retry and redrive belong to the real transport, never to the caller

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub use memory::{MemoryJobQueue, MemoryQueue, MemoryWorkflows};

/// Message attribute keys the ingress stage sets on every enqueue.
pub const ATTR_TRACE_ID: &str = "traceId";
pub const ATTR_SPAN_ID: &str = "spanId";
pub const ATTR_TRACE_CARRIER: &str = "traceCarrier";

/// Job parameter holding the serialized envelope.
pub const JOB_DATA_PARAM: &str = "jobData";

/// Failure of a downstream handoff call.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport answered and refused the call.
    #[error("transport rejected the request: {0}")]
    Rejected(String),

    /// No answer within the handoff deadline.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The transport could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Rejected(_) => "rejected",
            TransportError::Timeout { .. } => "timeout",
            TransportError::Unavailable(_) => "unavailable",
        }
    }
}

/// A typed string attribute, shaped like a queue message attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttribute {
    pub data_type: String,
    pub string_value: String,
}

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: "String".to_string(),
            string_value: value.into(),
        }
    }
}

pub type MessageAttributes = BTreeMap<String, MessageAttribute>;

/// A message as delivered to the queue relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    #[serde(default)]
    pub attributes: MessageAttributes,
}

/// A compute job request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub job_name: String,
    pub job_queue: String,
    pub job_definition: String,
    /// String-valued job parameters; the envelope lives under `jobData`.
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReceipt {
    pub job_id: String,
    pub job_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub execution_arn: String,
    pub start_date: DateTime<Utc>,
}

/// A workflow execution as seen by the steps: the execution name and the state input.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedExecution {
    pub state_machine: String,
    pub name: String,
    pub input: Value,
    pub receipt: ExecutionReceipt,
}

/// A job as seen by the compute stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    pub submission: JobSubmission,
    pub receipt: JobReceipt,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue one message; returns the transport's message id.
    async fn enqueue(
        &self,
        body: String,
        attributes: MessageAttributes,
    ) -> Result<String, TransportError>;
}

#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit_job(&self, submission: JobSubmission) -> Result<JobReceipt, TransportError>;
}

#[async_trait]
pub trait WorkflowStarter: Send + Sync {
    async fn start_execution(
        &self,
        state_machine: &str,
        input: Value,
        name: &str,
    ) -> Result<ExecutionReceipt, TransportError>;
}
