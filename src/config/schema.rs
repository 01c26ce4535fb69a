//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for every pipeline stage and binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// HTTP ingress listener.
    pub ingress: IngressConfig,

    /// Opaque references to the downstream transports.
    pub transports: TransportConfig,

    /// Handoff and request deadlines.
    pub timeouts: TimeoutConfig,

    /// Simulated work durations.
    pub work: WorkConfig,

    /// Carrier lookup policy.
    pub propagation: PropagationConfig,

    /// Telemetry backend.
    pub telemetry: TelemetryConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Ingress listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,

    /// Capacity of each in-process stage channel.
    pub channel_capacity: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
            channel_capacity: 1024,
        }
    }
}

/// Downstream transport references. Opaque to the pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Queue the ingress stage enqueues into.
    pub queue_url: String,

    /// Job queue the relay submits compute jobs to.
    pub job_queue: String,

    /// Job definition used for compute jobs.
    pub job_definition: String,

    /// Workflow state machine started by the compute stage.
    pub state_machine_arn: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_url: "local://trace-queue".to_string(),
            job_queue: "local-job-queue".to_string(),
            job_definition: "trace-compute".to_string(),
            state_machine_arn: "local:stateMachine:trace-workflow".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single handoff call (enqueue / submit / start) in milliseconds.
    pub handoff_ms: u64,

    /// Ingress request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handoff_ms: 10_000,
            request_secs: 30,
        }
    }
}

/// Durations of the simulated work each stage performs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkConfig {
    pub compute_ms: u64,
    pub step_a_ms: u64,
    pub step_b_ms: u64,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            compute_ms: 3000,
            step_a_ms: 100,
            step_b_ms: 200,
        }
    }
}

/// Where the queue relay looks for the inbound carrier first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierPrecedence {
    /// Message body first, then message attributes.
    #[default]
    BodyFirst,
    /// Message attributes first, then message body.
    AttributesFirst,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub carrier_precedence: CarrierPrecedence,
}

/// Which exporter receives telemetry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterKind {
    #[default]
    Log,
    Http,
    Memory,
}

/// Telemetry backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name reported with every record.
    pub service_name: String,

    pub exporter: ExporterKind,

    /// Collector endpoint for the http exporter.
    pub endpoint: Option<String>,

    /// Collector API key, sent as the `api-key` header.
    pub api_key: Option<String>,

    /// Records per http batch.
    pub batch_size: usize,

    /// Flush interval for partially filled batches in milliseconds.
    pub flush_interval_ms: u64,

    /// Per-request export timeout in seconds.
    pub export_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "trace-relay".to_string(),
            exporter: ExporterKind::Log,
            endpoint: None,
            api_key: None,
            batch_size: 64,
            flush_interval_ms: 1000,
            export_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
