//! Shared fixtures for integration tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use trace_relay::config::PipelineConfig;
use trace_relay::stages::IngressRequest;
use trace_relay::telemetry::{MemoryExporter, Telemetry, Tracer};
use trace_relay::transport::{
    ExecutionReceipt, MessageAttributes, QueueTransport, TransportError, WorkflowStarter,
};

/// Tracer that captures every record.
#[allow(dead_code)]
pub fn capturing_tracer(service: &str) -> (Arc<dyn Telemetry>, MemoryExporter) {
    let exporter = MemoryExporter::new();
    let tracer: Arc<dyn Telemetry> = Arc::new(Tracer::new(service, Arc::new(exporter.clone())));
    (tracer, exporter)
}

/// Default config with a short handoff deadline.
#[allow(dead_code)]
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.timeouts.handoff_ms = 250;
    config
}

#[allow(dead_code)]
pub fn post(body: &str) -> IngressRequest {
    IngressRequest {
        method: "POST".to_string(),
        path: "/trace".to_string(),
        headers: Vec::new(),
        body: Some(body.to_string()),
    }
}

/// Queue that refuses every message.
#[allow(dead_code)]
pub struct RejectingQueue;

#[async_trait]
impl QueueTransport for RejectingQueue {
    async fn enqueue(
        &self,
        _body: String,
        _attributes: MessageAttributes,
    ) -> Result<String, TransportError> {
        Err(TransportError::Rejected("queue does not exist".to_string()))
    }
}

/// Queue that never answers.
#[allow(dead_code)]
pub struct PendingQueue;

#[async_trait]
impl QueueTransport for PendingQueue {
    async fn enqueue(
        &self,
        _body: String,
        _attributes: MessageAttributes,
    ) -> Result<String, TransportError> {
        std::future::pending().await
    }
}

/// Workflow engine that never answers.
#[allow(dead_code)]
pub struct PendingWorkflows;

#[async_trait]
impl WorkflowStarter for PendingWorkflows {
    async fn start_execution(
        &self,
        _state_machine: &str,
        _input: Value,
        _name: &str,
    ) -> Result<ExecutionReceipt, TransportError> {
        std::future::pending().await
    }
}
