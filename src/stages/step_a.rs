//! Workflow step A: state input in, partial result out as the next state.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::envelope::{Envelope, Stage, StepResult};
use crate::propagation::ActiveTrace;
use crate::stages::{conclude, log_entry, InvocationContext, StageError, Work};
use crate::telemetry::{Attributes, Telemetry};

pub struct StepAStage {
    telemetry: Arc<dyn Telemetry>,
    work: Arc<dyn Work>,
}

impl StepAStage {
    pub fn new(telemetry: Arc<dyn Telemetry>, work: Arc<dyn Work>) -> Self {
        Self { telemetry, work }
    }

    /// Returns the envelope the workflow passes to step B.
    pub async fn handle(
        &self,
        input: Value,
        ctx: &InvocationContext,
    ) -> Result<Envelope, StageError> {
        let envelope = Envelope::from_state_lenient(Stage::StepA, input);
        let trace = self
            .telemetry
            .continue_or_start(Stage::StepA, envelope.carrier());
        log_entry(&trace, ctx);

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
        let outcome = self.work.perform(Stage::StepA).await?;

        envelope.record_step_a(StepResult {
            trace_id: trace_id.clone(),
            span_id: trace.span_id().to_string(),
            processed: true,
            processing_time: outcome.duration_ms(),
            timestamp: Utc::now(),
        })?;

        let carrier = self.telemetry.insert_carrier(trace);
        envelope.hand_off(trace, carrier);

        self.telemetry.record_attributes(
            trace,
            Attributes::new()
                .with("workflow.execution_name", ctx.function_name.as_str())
                .with("step.processing_time", outcome.duration_ms())
                .with("trace_id", trace_id.as_str()),
        );
        tracing::info!(trace_id = %trace_id, "Step A complete, passing state to step B");

        Ok(envelope)
    }
}
