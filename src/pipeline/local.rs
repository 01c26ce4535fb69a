//! All five stages chained in-process, one envelope at a time.
//!
//! Every hop's envelope is captured from the in-memory transports, so a run
//! can be inspected and checked for append-only growth.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::envelope::{Envelope, EnvelopeError, PayloadError, Stage};
use crate::stages::{
    ComputeStage, IngressAck, IngressRequest, IngressStage, InvocationContext, QueueEvent,
    QueueRelayStage, StageError, StageWork, StepAStage, StepBStage,
};
use crate::telemetry::Telemetry;
use crate::transport::{MemoryJobQueue, MemoryQueue, MemoryWorkflows, JOB_DATA_PARAM};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("{0} handed off nothing to the next stage")]
    MissingHandoff(Stage),

    #[error("handoff from {stage} carried an unusable envelope: {source}")]
    Payload {
        stage: Stage,
        #[source]
        source: PayloadError,
    },

    #[error("envelope error after {stage}: {source}")]
    Envelope {
        stage: Stage,
        #[source]
        source: EnvelopeError,
    },
}

/// Outcome of one end-to-end run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub ack: IngressAck,
    /// Envelope as each stage handed it off, in pipeline order.
    pub hops: Vec<(Stage, Envelope)>,
}

impl PipelineRun {
    /// The envelope step B returned.
    pub fn final_envelope(&self) -> Option<&Envelope> {
        self.hops.last().map(|(_, envelope)| envelope)
    }

    pub fn hop(&self, stage: Stage) -> Option<&Envelope> {
        self.hops
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, envelope)| envelope)
    }
}

pub struct LocalPipeline {
    ingress: IngressStage,
    queue_relay: QueueRelayStage,
    compute: ComputeStage,
    step_a: StepAStage,
    step_b: StepBStage,
    queue: MemoryQueue,
    jobs: MemoryJobQueue,
    workflows: MemoryWorkflows,
}

impl LocalPipeline {
    pub fn new(config: &PipelineConfig, telemetry: Arc<dyn Telemetry>, work: StageWork) -> Self {
        let queue = MemoryQueue::new();
        let jobs = MemoryJobQueue::new();
        let workflows = MemoryWorkflows::new();

        Self {
            ingress: IngressStage::new(config, telemetry.clone(), Arc::new(queue.clone())),
            queue_relay: QueueRelayStage::new(config, telemetry.clone(), Arc::new(jobs.clone())),
            compute: ComputeStage::new(
                config,
                telemetry.clone(),
                Arc::new(workflows.clone()),
                work.compute,
            ),
            step_a: StepAStage::new(telemetry.clone(), work.step_a),
            step_b: StepBStage::new(telemetry, work.step_b),
            queue,
            jobs,
            workflows,
        }
    }

    /// Push one request through every stage.
    pub async fn run(&self, request: IngressRequest) -> Result<PipelineRun, PipelineError> {
        let ingress_ctx = InvocationContext::generate(Stage::Ingress.service_name());
        let ack = self
            .ingress
            .handle(request, &ingress_ctx)
            .await
            .map_err(stage_error(Stage::Ingress))?;

        let message = self
            .queue
            .messages()
            .into_iter()
            .find(|m| m.message_id == ack.message_id)
            .ok_or(PipelineError::MissingHandoff(Stage::Ingress))?;
        let mut hops = vec![(Stage::Ingress, parse(Stage::Ingress, &message.body)?)];

        let relay_ctx =
            InvocationContext::new(message.message_id.clone(), Stage::QueueRelay.service_name());
        let receipts = self
            .queue_relay
            .handle(QueueEvent { records: vec![message] }, &relay_ctx)
            .await
            .map_err(stage_error(Stage::QueueRelay))?;
        let receipt = receipts
            .into_iter()
            .next()
            .ok_or(PipelineError::MissingHandoff(Stage::QueueRelay))?;
        let job = self
            .jobs
            .jobs()
            .into_iter()
            .find(|job| job.receipt.job_id == receipt.job_id)
            .ok_or(PipelineError::MissingHandoff(Stage::QueueRelay))?;
        let job_data = job
            .submission
            .parameters
            .get(JOB_DATA_PARAM)
            .ok_or(PipelineError::MissingHandoff(Stage::QueueRelay))?;
        push_hop(&mut hops, Stage::QueueRelay, parse(Stage::QueueRelay, job_data)?)?;

        let compute_ctx =
            InvocationContext::new(job.receipt.job_id.clone(), job.receipt.job_name.clone());
        let execution_receipt = self
            .compute
            .handle(&job.submission.parameters, &compute_ctx)
            .await
            .map_err(stage_error(Stage::Compute))?;
        let execution = self
            .workflows
            .executions()
            .into_iter()
            .find(|e| e.receipt.execution_arn == execution_receipt.execution_arn)
            .ok_or(PipelineError::MissingHandoff(Stage::Compute))?;
        let compute_out: Envelope = serde_json::from_value(execution.input.clone())
            .map_err(|e| PipelineError::Payload {
                stage: Stage::Compute,
                source: PayloadError::InvalidJson(e),
            })?;
        push_hop(&mut hops, Stage::Compute, compute_out)?;

        let step_ctx = InvocationContext::new(
            execution.receipt.execution_arn.clone(),
            execution.name.clone(),
        );
        let step_a_out = self
            .step_a
            .handle(execution.input, &step_ctx)
            .await
            .map_err(stage_error(Stage::StepA))?;
        let step_b_in = step_a_out.to_value().map_err(|e| PipelineError::Envelope {
            stage: Stage::StepA,
            source: e,
        })?;
        push_hop(&mut hops, Stage::StepA, step_a_out)?;

        let step_b_out = self
            .step_b
            .handle(step_b_in, &step_ctx)
            .await
            .map_err(stage_error(Stage::StepB))?;
        push_hop(&mut hops, Stage::StepB, step_b_out)?;

        Ok(PipelineRun { ack, hops })
    }
}

fn stage_error(stage: Stage) -> impl FnOnce(StageError) -> PipelineError {
    move |source| PipelineError::Stage { stage, source }
}

fn parse(stage: Stage, raw: &str) -> Result<Envelope, PipelineError> {
    Envelope::parse(raw).map_err(|source| PipelineError::Payload { stage, source })
}

/// Append a hop after checking it extends the previous one.
fn push_hop(
    hops: &mut Vec<(Stage, Envelope)>,
    stage: Stage,
    envelope: Envelope,
) -> Result<(), PipelineError> {
    if let Some((_, previous)) = hops.last() {
        envelope
            .verify_extends(previous)
            .map_err(|source| PipelineError::Envelope { stage, source })?;
    }
    hops.push((stage, envelope));
    Ok(())
}
