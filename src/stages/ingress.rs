//! Ingress stage: HTTP request in, queue message out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::envelope::{Envelope, IngressResult, Stage};
use crate::propagation::{ActiveTrace, Carrier};
use crate::resilience::with_deadline;
use crate::stages::{conclude, log_entry, InvocationContext, StageError};
use crate::telemetry::{Attributes, Telemetry};
use crate::transport::{
    MessageAttribute, MessageAttributes, QueueTransport, ATTR_SPAN_ID, ATTR_TRACE_CARRIER,
    ATTR_TRACE_ID,
};

const SOURCE: &str = "ingress";
const ACCEPTED_MESSAGE: &str = "Message sent to queue successfully";
const FAILED_ERROR: &str = "Internal server error";

/// An inbound request, independent of the HTTP stack that delivered it.
#[derive(Debug, Clone, Default)]
pub struct IngressRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl IngressRequest {
    /// Trace headers sent by the caller, if any.
    pub fn carrier(&self) -> Option<Carrier> {
        Carrier::from_headers(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Body of a successful ingress response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressAck {
    pub message: String,
    pub trace_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Structured response returned to the ingress transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IngressResponse {
    Accepted(IngressAck),
    Failed { error: String, message: String },
}

impl IngressResponse {
    pub fn status(&self) -> u16 {
        match self {
            IngressResponse::Accepted(_) => 200,
            IngressResponse::Failed { .. } => 500,
        }
    }
}

pub struct IngressStage {
    telemetry: Arc<dyn Telemetry>,
    queue: Arc<dyn QueueTransport>,
    queue_url: String,
    handoff_timeout: Duration,
}

impl IngressStage {
    pub fn new(
        config: &PipelineConfig,
        telemetry: Arc<dyn Telemetry>,
        queue: Arc<dyn QueueTransport>,
    ) -> Self {
        Self {
            telemetry,
            queue,
            queue_url: config.transports.queue_url.clone(),
            handoff_timeout: Duration::from_millis(config.timeouts.handoff_ms),
        }
    }

    /// Run the stage; failures are recorded on the span and returned.
    pub async fn handle(
        &self,
        request: IngressRequest,
        ctx: &InvocationContext,
    ) -> Result<IngressAck, StageError> {
        let envelope = Envelope::from_request_body(request.body.as_deref());

        // Trace headers win over a carrier embedded in the body.
        let carrier = request.carrier().or_else(|| envelope.carrier().cloned());
        let trace = self
            .telemetry
            .continue_or_start(Stage::Ingress, carrier.as_ref());
        log_entry(&trace, ctx);

        let result = self.run(&trace, envelope, &request, ctx).await;
        conclude(self.telemetry.as_ref(), trace, result)
    }

    /// Run the stage and map the outcome onto a response.
    pub async fn respond(&self, request: IngressRequest, ctx: &InvocationContext) -> IngressResponse {
        match self.handle(request, ctx).await {
            Ok(ack) => IngressResponse::Accepted(ack),
            Err(e) => {
                tracing::error!(error = %e, invocation_id = %ctx.invocation_id, "Ingress failed");
                IngressResponse::Failed {
                    error: FAILED_ERROR.to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn run(
        &self,
        trace: &ActiveTrace,
        mut envelope: Envelope,
        request: &IngressRequest,
        ctx: &InvocationContext,
    ) -> Result<IngressAck, StageError> {
        let trace_id = trace.trace_id().to_string();
        let span_id = trace.span_id().to_string();

        envelope.record_ingress(IngressResult {
            trace_id: trace_id.clone(),
            span_id: span_id.clone(),
            request_id: ctx.invocation_id.clone(),
            source: SOURCE.to_string(),
            timestamp: Utc::now(),
        })?;

        let carrier = self.telemetry.insert_carrier(trace);
        let mut attributes = MessageAttributes::new();
        attributes.insert(ATTR_TRACE_ID.to_string(), MessageAttribute::string(&trace_id));
        attributes.insert(ATTR_SPAN_ID.to_string(), MessageAttribute::string(&span_id));
        attributes.insert(
            ATTR_TRACE_CARRIER.to_string(),
            MessageAttribute::string(carrier.to_json()),
        );
        envelope.hand_off(trace, carrier);
        let body = envelope.to_json()?;

        tracing::info!(
            trace_id = %trace_id,
            queue_url = %self.queue_url,
            "Enqueuing envelope"
        );
        let message_id = with_deadline(
            "enqueue",
            self.handoff_timeout,
            self.queue.enqueue(body, attributes),
        )
        .await?;

        self.telemetry.record_attributes(
            trace,
            Attributes::new()
                .with("queue.message_id", message_id.as_str())
                .with("queue.url", self.queue_url.as_str())
                .with("http.method", request.method.as_str())
                .with("http.path", request.path.as_str())
                .with("trace_id", trace_id.as_str()),
        );

        Ok(IngressAck {
            message: ACCEPTED_MESSAGE.to_string(),
            trace_id,
            message_id,
            timestamp: Utc::now(),
        })
    }
}
