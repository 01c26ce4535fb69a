//! In-process transports.
//!
//! A plain transport records every accepted handoff for inspection. A
//! forwarding transport delivers each handoff over an mpsc channel instead,
//! which is how the worker pipeline chains stages without cloud services;
//! it keeps no copy, so a long-running server does not grow with traffic.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::transport::{
    ExecutionReceipt, JobReceipt, JobSubmission, JobSubmitter, MessageAttributes, QueueMessage,
    QueueTransport, StartedExecution, SubmittedJob, TransportError, WorkflowStarter,
};

#[derive(Debug)]
struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
    forward: Option<mpsc::Sender<T>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            forward: self.forward.clone(),
        }
    }
}

impl<T: Clone> Recorder<T> {
    fn new(forward: Option<mpsc::Sender<T>>) -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
            forward,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Vec<T> {
        self.lock().clone()
    }

    async fn accept(&self, item: T) -> Result<(), TransportError> {
        match &self.forward {
            Some(tx) => tx
                .send(item)
                .await
                .map_err(|_| TransportError::Unavailable("downstream consumer stopped".into())),
            None => {
                self.lock().push(item);
                Ok(())
            }
        }
    }
}

/// Queue that hands out uuid message ids.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    recorder: Recorder<QueueMessage>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new(None),
        }
    }

    /// Deliver each message to `tx` without recording it.
    pub fn forwarding(tx: mpsc::Sender<QueueMessage>) -> Self {
        Self {
            recorder: Recorder::new(Some(tx)),
        }
    }

    pub fn messages(&self) -> Vec<QueueMessage> {
        self.recorder.snapshot()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn enqueue(
        &self,
        body: String,
        attributes: MessageAttributes,
    ) -> Result<String, TransportError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.recorder
            .accept(QueueMessage {
                message_id: message_id.clone(),
                body,
                attributes,
            })
            .await?;
        Ok(message_id)
    }
}

/// Batch job queue that assigns uuid job ids.
#[derive(Debug, Clone)]
pub struct MemoryJobQueue {
    recorder: Recorder<SubmittedJob>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new(None),
        }
    }

    /// Deliver each job to `tx` without recording it.
    pub fn forwarding(tx: mpsc::Sender<SubmittedJob>) -> Self {
        Self {
            recorder: Recorder::new(Some(tx)),
        }
    }

    pub fn jobs(&self) -> Vec<SubmittedJob> {
        self.recorder.snapshot()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobSubmitter for MemoryJobQueue {
    async fn submit_job(&self, submission: JobSubmission) -> Result<JobReceipt, TransportError> {
        let receipt = JobReceipt {
            job_id: uuid::Uuid::new_v4().to_string(),
            job_name: submission.job_name.clone(),
        };
        self.recorder
            .accept(SubmittedJob {
                submission,
                receipt: receipt.clone(),
            })
            .await?;
        Ok(receipt)
    }
}

/// Workflow engine that records executions instead of running them.
#[derive(Debug, Clone)]
pub struct MemoryWorkflows {
    recorder: Recorder<StartedExecution>,
}

impl MemoryWorkflows {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new(None),
        }
    }

    /// Deliver each execution to `tx` without recording it.
    pub fn forwarding(tx: mpsc::Sender<StartedExecution>) -> Self {
        Self {
            recorder: Recorder::new(Some(tx)),
        }
    }

    pub fn executions(&self) -> Vec<StartedExecution> {
        self.recorder.snapshot()
    }
}

impl Default for MemoryWorkflows {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStarter for MemoryWorkflows {
    async fn start_execution(
        &self,
        state_machine: &str,
        input: Value,
        name: &str,
    ) -> Result<ExecutionReceipt, TransportError> {
        let receipt = ExecutionReceipt {
            execution_arn: execution_arn(state_machine, name),
            start_date: Utc::now(),
        };
        self.recorder
            .accept(StartedExecution {
                state_machine: state_machine.to_string(),
                name: name.to_string(),
                input,
                receipt: receipt.clone(),
            })
            .await?;
        Ok(receipt)
    }
}

fn execution_arn(state_machine: &str, name: &str) -> String {
    let base = state_machine.replacen(":stateMachine:", ":execution:", 1);
    format!("{}:{}", base, name)
}
