//! Compute stage: batch job in, workflow execution out.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::envelope::{ComputeResult, Envelope, Stage};
use crate::propagation::ActiveTrace;
use crate::resilience::with_deadline;
use crate::stages::{conclude, log_entry, run_name, InvocationContext, StageError, Work};
use crate::telemetry::{Attributes, Telemetry};
use crate::transport::{ExecutionReceipt, WorkflowStarter, JOB_DATA_PARAM};

pub struct ComputeStage {
    telemetry: Arc<dyn Telemetry>,
    workflows: Arc<dyn WorkflowStarter>,
    work: Arc<dyn Work>,
    state_machine: String,
    handoff_timeout: Duration,
}

impl ComputeStage {
    pub fn new(
        config: &PipelineConfig,
        telemetry: Arc<dyn Telemetry>,
        workflows: Arc<dyn WorkflowStarter>,
        work: Arc<dyn Work>,
    ) -> Self {
        Self {
            telemetry,
            workflows,
            work,
            state_machine: config.transports.state_machine_arn.clone(),
            handoff_timeout: Duration::from_millis(config.timeouts.handoff_ms),
        }
    }

    /// Run one job. `parameters` are the job parameters; `ctx` carries the job
    /// id and job name.
    pub async fn handle(
        &self,
        parameters: &BTreeMap<String, String>,
        ctx: &InvocationContext,
    ) -> Result<ExecutionReceipt, StageError> {
        let job_data = parameters.get(JOB_DATA_PARAM).map(String::as_str);
        if job_data.is_none() {
            tracing::warn!(job_id = %ctx.invocation_id, "Job parameters carry no jobData");
        }
        let envelope = Envelope::parse_lenient(Stage::Compute, job_data);

        let trace = self
            .telemetry
            .continue_or_start(Stage::Compute, envelope.carrier());
        log_entry(&trace, ctx);

        let result = self.run(&trace, envelope, ctx).await;
        conclude(self.telemetry.as_ref(), trace, result)
    }

    async fn run(
        &self,
        trace: &ActiveTrace,
        mut envelope: Envelope,
        ctx: &InvocationContext,
    ) -> Result<ExecutionReceipt, StageError> {
        let trace_id = trace.trace_id().to_string();
        let parent_trace_id = envelope.parent_trace_id.clone();
        let parent_span_id = envelope.parent_span_id.clone();

        let outcome = self.work.perform(Stage::Compute).await?;
        tracing::info!(
            trace_id = %trace_id,
            computation = %outcome.computation,
            result = outcome.value,
            duration_ms = outcome.duration_ms(),
            "Computation finished"
        );

        envelope.record_compute(ComputeResult {
            trace_id: trace_id.clone(),
            span_id: trace.span_id().to_string(),
            result: outcome.value,
            computation: outcome.computation.clone(),
            duration_ms: outcome.duration_ms(),
            timestamp: Utc::now(),
        })?;

        let carrier = self.telemetry.insert_carrier(trace);
        envelope.hand_off(trace, carrier);

        let execution_name = run_name("execution");
        let input = envelope.to_value()?;
        tracing::info!(
            trace_id = %trace_id,
            execution_name = %execution_name,
            state_machine = %self.state_machine,
            "Starting workflow"
        );
        let receipt = with_deadline(
            "start_execution",
            self.handoff_timeout,
            self.workflows
                .start_execution(&self.state_machine, input, &execution_name),
        )
        .await?;

        let mut attributes = Attributes::new()
            .with("batch.job_name", ctx.function_name.as_str())
            .with("batch.job_id", ctx.invocation_id.as_str())
            .with("workflow.execution_arn", receipt.execution_arn.as_str())
            .with("workflow.start_date", receipt.start_date.to_rfc3339())
            .with("batch.computation_result", outcome.value)
            .with("trace_id", trace_id.as_str());
        if let Some(parent) = parent_trace_id {
            attributes = attributes.with("parent_trace_id", parent);
        }
        if let Some(parent) = parent_span_id {
            attributes = attributes.with("parent_span_id", parent);
        }
        self.telemetry.record_attributes(trace, attributes);

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{SimulatedWork, WorkError, WorkOutcome};
    use crate::telemetry::{MemoryExporter, Tracer};
    use crate::transport::MemoryWorkflows;
    use async_trait::async_trait;

    struct FailingWork;

    #[async_trait]
    impl Work for FailingWork {
        async fn perform(&self, _stage: Stage) -> Result<WorkOutcome, WorkError> {
            Err(WorkError("matrix is singular".into()))
        }
    }

    fn stage(work: Arc<dyn Work>) -> (ComputeStage, MemoryWorkflows, MemoryExporter) {
        let exporter = MemoryExporter::new();
        let workflows = MemoryWorkflows::new();
        let stage = ComputeStage::new(
            &PipelineConfig::default(),
            Arc::new(Tracer::new("compute-job", Arc::new(exporter.clone()))),
            Arc::new(workflows.clone()),
            work,
        );
        (stage, workflows, exporter)
    }

    fn simulated() -> Arc<dyn Work> {
        Arc::new(SimulatedWork::new(
            Duration::from_millis(3000),
            "matrix_multiplication",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_result_and_starts_workflow() {
        let (stage, workflows, exporter) = stage(simulated());
        let mut params = BTreeMap::new();
        params.insert(JOB_DATA_PARAM.to_string(), r#"{"message":"hi"}"#.to_string());

        let receipt = stage
            .handle(&params, &InvocationContext::new("job-1", "trace-job-1"))
            .await
            .unwrap();

        let execution = workflows.executions().pop().unwrap();
        assert_eq!(execution.receipt, receipt);
        assert!(execution.name.starts_with("execution-"));

        let envelope: Envelope = serde_json::from_value(execution.input).unwrap();
        let result = envelope.compute_result().unwrap();
        assert_eq!(result.computation, "matrix_multiplication");
        assert_eq!(result.duration_ms, 3000);
        assert_eq!(envelope.passthrough()["message"], "hi");
        assert_eq!(envelope.parent_span_id.as_deref(), Some(result.span_id.as_str()));

        let attrs = &exporter.attributes_for(&result.span_id)[0];
        assert_eq!(attrs.get_str("batch.job_id"), Some("job-1"));
        assert_eq!(
            attrs.get_str("workflow.execution_arn"),
            Some(receipt.execution_arn.as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_job_data_still_runs() {
        let (stage, workflows, _) = stage(simulated());

        stage
            .handle(&BTreeMap::new(), &InvocationContext::new("job-2", "trace-job-2"))
            .await
            .unwrap();

        let envelope: Envelope =
            serde_json::from_value(workflows.executions().pop().unwrap().input).unwrap();
        assert!(envelope.compute_result().is_some());
        assert!(envelope.ingress_result().is_none());
    }

    #[tokio::test]
    async fn test_work_failure_is_recorded_and_propagated() {
        let (stage, workflows, exporter) = stage(Arc::new(FailingWork));

        let err = stage
            .handle(&BTreeMap::new(), &InvocationContext::new("job-3", "trace-job-3"))
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Work(_)));
        assert_eq!(exporter.errors().len(), 1);
        assert!(exporter.errors()[0].message.contains("matrix is singular"));
        assert!(workflows.executions().is_empty());
    }
}
