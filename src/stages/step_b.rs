//! Workflow step B: the terminal stage.
//!
//! Appends its own result, then materializes the lineage: `traceChain` read
//! from the result slots and `totalProcessingTime` summed from the two steps.
//! Nothing downstream consumes a carrier, so none is inserted.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::envelope::{Envelope, Stage, StepResult, STATUS_COMPLETED};
use crate::propagation::ActiveTrace;
use crate::stages::{conclude, log_entry, InvocationContext, StageError, Work};
use crate::telemetry::{Attributes, Telemetry};

pub struct StepBStage {
    telemetry: Arc<dyn Telemetry>,
    work: Arc<dyn Work>,
}

impl StepBStage {
    pub fn new(telemetry: Arc<dyn Telemetry>, work: Arc<dyn Work>) -> Self {
        Self { telemetry, work }
    }

    /// Returns the completed envelope.
    pub async fn handle(
        &self,
        input: Value,
        ctx: &InvocationContext,
    ) -> Result<Envelope, StageError> {
        let envelope = Envelope::from_state_lenient(Stage::StepB, input);
        let trace = self
            .telemetry
            .continue_or_start(Stage::StepB, envelope.carrier());
        log_entry(&trace, ctx);

        if envelope.parent_matches_predecessor(Stage::StepB) == Some(false) {
            tracing::warn!(
                parent_trace_id = envelope.parent_trace_id.as_deref().unwrap_or_default(),
                "parentTraceId does not match the preceding stage's recorded trace"
            );
        }

        let result = self.run(&trace, envelope, ctx).await;
        conclude(self.telemetry.as_ref(), trace, result)
    }

    async fn run(
        &self,
        trace: &ActiveTrace,
        mut envelope: Envelope,
        ctx: &InvocationContext,
    ) -> Result<Envelope, StageError> {
        let trace_id = trace.trace_id().to_string();
        let outcome = self.work.perform(Stage::StepB).await?;

        envelope.record_step_b(StepResult {
            trace_id: trace_id.clone(),
            span_id: trace.span_id().to_string(),
            processed: true,
            processing_time: outcome.duration_ms(),
            timestamp: Utc::now(),
        })?;

        let total = envelope.total_processing_time();
        let chain = envelope.trace_chain();
        let chain_length = u64::try_from(chain.len()).unwrap_or(u64::MAX);
        envelope.complete(total, chain);

        self.telemetry.record_attributes(
            trace,
            Attributes::new()
                .with("workflow.execution_name", ctx.function_name.as_str())
                .with("final.status", STATUS_COMPLETED)
                .with("total.processing_time", total)
                .with("trace_chain.length", chain_length)
                .with("trace_id", trace_id.as_str()),
        );
        tracing::info!(
            trace_id = %trace_id,
            total_processing_time = total,
            stages = chain_length,
            "Pipeline completed"
        );

        Ok(envelope)
    }
}
