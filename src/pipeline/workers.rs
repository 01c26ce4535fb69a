//! Long-running stage workers connected by in-process channels.
//!
//! ```text
//! IngressStage ─MemoryQueue─▶ relay worker ─MemoryJobQueue─▶ compute worker
//!     ─MemoryWorkflows─▶ workflow worker (step A → step B) ─▶ completed
//! ```
//!
//! Each delivered item is handled on its own task, so independent envelopes
//! progress concurrently while each stage activation stays sequential. On
//! shutdown a worker stops receiving and waits for its in-flight items.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::config::PipelineConfig;
use crate::envelope::{Envelope, Stage};
use crate::lifecycle::Shutdown;
use crate::stages::{
    ComputeStage, IngressStage, InvocationContext, QueueEvent, QueueRelayStage, StageWork,
    StepAStage, StepBStage,
};
use crate::telemetry::Telemetry;
use crate::transport::{
    MemoryJobQueue, MemoryQueue, MemoryWorkflows, QueueMessage, StartedExecution, SubmittedJob,
};

/// Running workers plus the ingress stage that feeds them.
pub struct Workers {
    pub ingress: Arc<IngressStage>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Wire the stages together and start a worker per downstream stage.
    ///
    /// Completed envelopes are sent to `completed` when given.
    pub fn spawn(
        config: &PipelineConfig,
        telemetry: Arc<dyn Telemetry>,
        work: StageWork,
        shutdown: &Shutdown,
        completed: Option<mpsc::Sender<Envelope>>,
    ) -> Self {
        let capacity = config.ingress.channel_capacity;
        let (message_tx, message_rx) = mpsc::channel::<QueueMessage>(capacity);
        let (job_tx, job_rx) = mpsc::channel::<SubmittedJob>(capacity);
        let (execution_tx, execution_rx) = mpsc::channel::<StartedExecution>(capacity);

        let ingress = Arc::new(IngressStage::new(
            config,
            telemetry.clone(),
            Arc::new(MemoryQueue::forwarding(message_tx)),
        ));
        let relay = Arc::new(QueueRelayStage::new(
            config,
            telemetry.clone(),
            Arc::new(MemoryJobQueue::forwarding(job_tx)),
        ));
        let compute = Arc::new(ComputeStage::new(
            config,
            telemetry.clone(),
            Arc::new(MemoryWorkflows::forwarding(execution_tx)),
            work.compute,
        ));
        let workflow = Arc::new(WorkflowRunner {
            step_a: StepAStage::new(telemetry.clone(), work.step_a),
            step_b: StepBStage::new(telemetry, work.step_b),
            completed,
        });

        let handles = vec![
            tokio::spawn(worker(
                Stage::QueueRelay,
                message_rx,
                shutdown.subscribe(),
                move |message: QueueMessage| {
                    let relay = relay.clone();
                    async move {
                        let ctx = InvocationContext::new(
                            message.message_id.clone(),
                            Stage::QueueRelay.service_name(),
                        );
                        let event = QueueEvent {
                            records: vec![message],
                        };
                        if let Err(e) = relay.handle(event, &ctx).await {
                            tracing::error!(error = %e, "Queue relay failed");
                        }
                    }
                },
            )),
            tokio::spawn(worker(
                Stage::Compute,
                job_rx,
                shutdown.subscribe(),
                move |job: SubmittedJob| {
                    let compute = compute.clone();
                    async move {
                        let ctx = InvocationContext::new(job.receipt.job_id, job.receipt.job_name);
                        if let Err(e) = compute.handle(&job.submission.parameters, &ctx).await {
                            tracing::error!(error = %e, "Compute job failed");
                        }
                    }
                },
            )),
            tokio::spawn(worker(
                Stage::StepA,
                execution_rx,
                shutdown.subscribe(),
                move |execution: StartedExecution| {
                    let workflow = workflow.clone();
                    async move { workflow.run(execution).await }
                },
            )),
        ];

        tracing::info!(workers = handles.len(), "Pipeline workers started");
        Self { ingress, handles }
    }

    /// Wait for every worker loop to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}

/// Runs both workflow steps for one execution.
struct WorkflowRunner {
    step_a: StepAStage,
    step_b: StepBStage,
    completed: Option<mpsc::Sender<Envelope>>,
}

impl WorkflowRunner {
    async fn run(&self, execution: StartedExecution) {
        let ctx = InvocationContext::new(execution.receipt.execution_arn, execution.name);

        let after_a = match self.step_a.handle(execution.input, &ctx).await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "Workflow step A failed");
                return;
            }
        };
        let input = match after_a.to_value() {
            Ok(input) => input,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode step A output");
                return;
            }
        };

        match self.step_b.handle(input, &ctx).await {
            Ok(done) => {
                if let Some(tx) = &self.completed {
                    if tx.send(done).await.is_err() {
                        tracing::debug!("Completion receiver dropped");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Workflow step B failed"),
        }
    }
}

/// Receive items until shutdown or the channel closes, one task per item.
///
/// Items already being handled run to completion before the worker returns.
async fn worker<T, F, Fut>(
    stage: Stage,
    mut rx: mpsc::Receiver<T>,
    mut shutdown: broadcast::Receiver<()>,
    handle: F,
) where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => {
                    in_flight.spawn(handle(item));
                }
                None => {
                    tracing::debug!(stage = %stage, "Upstream closed, worker exiting");
                    break;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                reap(stage, joined);
            }
            _ = shutdown.recv() => {
                tracing::info!(stage = %stage, "Worker received shutdown signal, exiting loop");
                break;
            }
        }
    }

    if !in_flight.is_empty() {
        tracing::info!(stage = %stage, in_flight = in_flight.len(), "Draining in-flight items");
    }
    while let Some(joined) = in_flight.join_next().await {
        reap(stage, joined);
    }
}

fn reap(stage: Stage, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(stage = %stage, error = %e, "Item task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::IngressRequest;
    use crate::telemetry::{MemoryExporter, Tracer};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_request_flows_through_workers() {
        let config = PipelineConfig::default();
        let shutdown = Shutdown::new();
        let (done_tx, mut done_rx) = mpsc::channel(1);
        let workers = Workers::spawn(
            &config,
            Arc::new(Tracer::new("workers", Arc::new(MemoryExporter::new()))),
            StageWork::simulated(&config.work),
            &shutdown,
            Some(done_tx),
        );

        let ack = workers
            .ingress
            .handle(
                IngressRequest {
                    body: Some(r#"{"message":"hi"}"#.into()),
                    ..Default::default()
                },
                &InvocationContext::generate("ingress"),
            )
            .await
            .unwrap();

        let done = done_rx.recv().await.unwrap();
        assert_eq!(done.ingress_result().unwrap().trace_id, ack.trace_id);
        assert_eq!(done.recorded_stages(), Stage::ALL.to_vec());

        shutdown.trigger();
        workers.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_items() {
        let config = PipelineConfig::default();
        let shutdown = Shutdown::new();
        let exporter = MemoryExporter::new();
        let workers = Workers::spawn(
            &config,
            Arc::new(Tracer::new("workers", Arc::new(exporter.clone()))),
            StageWork::simulated(&config.work),
            &shutdown,
            None,
        );

        workers
            .ingress
            .handle(
                IngressRequest {
                    body: Some(r#"{"message":"hi"}"#.into()),
                    ..Default::default()
                },
                &InvocationContext::generate("ingress"),
            )
            .await
            .unwrap();

        // Compute is now partway through its simulated work.
        tokio::time::sleep(Duration::from_millis(config.work.compute_ms / 3)).await;
        assert!(!exporter.spans().iter().any(|s| s.stage == Stage::Compute));

        shutdown.trigger();
        workers.join().await;

        assert!(exporter.spans().iter().any(|s| s.stage == Stage::Compute));
    }
}
