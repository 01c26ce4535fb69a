//! Queue relay stage: queue message in, compute job out.
//!
//! The inbound carrier may arrive in the message body (the envelope's
//! `propagationCarrier`) or in the `traceCarrier` message attribute. Which is
//! consulted first is a configuration choice; the first one present is used.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CarrierPrecedence, PipelineConfig};
use crate::envelope::{Envelope, QueueRelayResult, Stage};
use crate::propagation::{ActiveTrace, Carrier};
use crate::resilience::with_deadline;
use crate::stages::{conclude, log_entry, run_name, InvocationContext, StageError, SERVICE_VERSION};
use crate::telemetry::{Attributes, Telemetry};
use crate::transport::{
    JobReceipt, JobSubmission, JobSubmitter, QueueMessage, ATTR_TRACE_CARRIER, JOB_DATA_PARAM,
};

/// A batch of messages delivered by the queue transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub records: Vec<QueueMessage>,
}

/// Where the relay found the carrier it continued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierSource {
    MessageBody,
    MessageAttributes,
}

impl CarrierSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CarrierSource::MessageBody => "message_body",
            CarrierSource::MessageAttributes => "message_attributes",
        }
    }
}

pub struct QueueRelayStage {
    telemetry: Arc<dyn Telemetry>,
    jobs: Arc<dyn JobSubmitter>,
    job_queue: String,
    job_definition: String,
    precedence: CarrierPrecedence,
    handoff_timeout: Duration,
}

impl QueueRelayStage {
    pub fn new(
        config: &PipelineConfig,
        telemetry: Arc<dyn Telemetry>,
        jobs: Arc<dyn JobSubmitter>,
    ) -> Self {
        Self {
            telemetry,
            jobs,
            job_queue: config.transports.job_queue.clone(),
            job_definition: config.transports.job_definition.clone(),
            precedence: config.propagation.carrier_precedence,
            handoff_timeout: Duration::from_millis(config.timeouts.handoff_ms),
        }
    }

    /// Relay every record in order. The first failure aborts the batch so the
    /// queue transport redelivers it.
    pub async fn handle(
        &self,
        event: QueueEvent,
        ctx: &InvocationContext,
    ) -> Result<Vec<JobReceipt>, StageError> {
        tracing::debug!(records = event.records.len(), "Queue event received");

        let mut receipts = Vec::with_capacity(event.records.len());
        for message in event.records {
            receipts.push(self.relay(message, ctx).await?);
        }
        Ok(receipts)
    }

    /// Relay a single message.
    pub async fn relay(
        &self,
        message: QueueMessage,
        ctx: &InvocationContext,
    ) -> Result<JobReceipt, StageError> {
        let envelope = Envelope::parse_lenient(Stage::QueueRelay, Some(&message.body));
        let selected = self.select_carrier(&envelope, &message);

        let trace = self
            .telemetry
            .continue_or_start(Stage::QueueRelay, selected.as_ref().map(|(c, _)| c));
        log_entry(&trace, ctx);
        match &selected {
            Some((_, source)) => {
                tracing::debug!(source = source.as_str(), "Continuing from carrier")
            }
            None => tracing::debug!(
                message_id = %message.message_id,
                "No carrier in message body or attributes"
            ),
        }

        let source = selected.map(|(_, source)| source);
        let result = self.run(&trace, envelope, &message, source).await;
        conclude(self.telemetry.as_ref(), trace, result)
    }

    /// Pick the first carrier present according to the configured precedence.
    fn select_carrier(
        &self,
        envelope: &Envelope,
        message: &QueueMessage,
    ) -> Option<(Carrier, CarrierSource)> {
        let from_body = || {
            envelope
                .carrier()
                .filter(|c| !c.is_empty())
                .cloned()
                .map(|c| (c, CarrierSource::MessageBody))
        };
        let from_attributes = || {
            attribute_carrier(message).map(|c| (c, CarrierSource::MessageAttributes))
        };

        match self.precedence {
            CarrierPrecedence::BodyFirst => from_body().or_else(from_attributes),
            CarrierPrecedence::AttributesFirst => from_attributes().or_else(from_body),
        }
    }

    async fn run(
        &self,
        trace: &ActiveTrace,
        mut envelope: Envelope,
        message: &QueueMessage,
        source: Option<CarrierSource>,
    ) -> Result<JobReceipt, StageError> {
        let trace_id = trace.trace_id().to_string();
        let job_name = run_name("trace-job");
        let parent_trace_id = envelope.parent_trace_id.clone();

        envelope.record_queue_relay(QueueRelayResult {
            trace_id: trace_id.clone(),
            span_id: trace.span_id().to_string(),
            message_id: message.message_id.clone(),
            job_name: job_name.clone(),
            timestamp: Utc::now(),
        })?;

        let carrier = self.telemetry.insert_carrier(trace);
        envelope.hand_off(trace, carrier);

        let mut parameters = BTreeMap::new();
        parameters.insert(JOB_DATA_PARAM.to_string(), envelope.to_json()?);
        let submission = JobSubmission {
            job_name: job_name.clone(),
            job_queue: self.job_queue.clone(),
            job_definition: self.job_definition.clone(),
            parameters,
        };

        tracing::info!(
            trace_id = %trace_id,
            job_name = %job_name,
            job_queue = %self.job_queue,
            "Submitting compute job"
        );
        let receipt = with_deadline(
            "submit_job",
            self.handoff_timeout,
            self.jobs.submit_job(submission),
        )
        .await?;

        let mut attributes = Attributes::new()
            .with("queue.message_id", message.message_id.as_str())
            .with("batch.job_id", receipt.job_id.as_str())
            .with("batch.job_name", job_name.as_str())
            .with("batch.queue", self.job_queue.as_str())
            .with("trace_id", trace_id.as_str())
            .with("service.name", Stage::QueueRelay.service_name())
            .with("service.version", SERVICE_VERSION);
        if let Some(parent) = parent_trace_id {
            attributes = attributes.with("parent_trace_id", parent);
        }
        if let Some(source) = source {
            attributes = attributes.with("trace.carrier_source", source.as_str());
        }
        self.telemetry.record_attributes(trace, attributes);

        Ok(receipt)
    }
}

/// Carrier from the `traceCarrier` attribute. An unreadable attribute counts as absent.
fn attribute_carrier(message: &QueueMessage) -> Option<Carrier> {
    let raw = &message.attributes.get(ATTR_TRACE_CARRIER)?.string_value;
    match Carrier::from_json(raw) {
        Ok(carrier) if !carrier.is_empty() => Some(carrier),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(
                message_id = %message.message_id,
                error = %e,
                "Ignoring unreadable carrier attribute"
            );
            None
        }
    }
}
