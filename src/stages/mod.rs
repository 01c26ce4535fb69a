//! Pipeline stage handlers.
//!
//! # Data Flow
//! ```text
//! inbound (request | message | job params | state input)
//!     → continue_or_start (carrier from header / body / attribute)
//!     → entry log (trace, span, parent)
//!     → work (network send | simulated computation)
//!     → insert_carrier, append own result slot, hand_off
//!     → downstream transport (under handoff deadline)
//!     → custom attributes (transport id + trace id)
//! ```
//!
//! # Design Decisions
//! - Stages are single-shot and stateless; all state rides in the envelope
//! - Capabilities (telemetry, transports, work) are injected at construction
//! - A failure is recorded against the span exactly once, in `conclude`,
//!   then returned to the caller unchanged

pub mod compute;
pub mod ingress;
pub mod queue_relay;
pub mod step_a;
pub mod step_b;
pub mod work;

use chrono::Utc;
use rand::Rng;
use thiserror::Error;

use crate::envelope::{EnvelopeError, Stage};
use crate::observability::metrics::{self, Outcome};
use crate::propagation::ActiveTrace;
use crate::telemetry::Telemetry;
use crate::transport::TransportError;

pub use compute::ComputeStage;
pub use ingress::{IngressAck, IngressRequest, IngressResponse, IngressStage};
pub use queue_relay::{CarrierSource, QueueEvent, QueueRelayStage};
pub use step_a::StepAStage;
pub use step_b::StepBStage;
pub use work::{SimulatedWork, StageWork, Work, WorkError, WorkOutcome};

/// Execution metadata handed to a stage by whatever activated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    /// Request id, message id, job id or execution ARN.
    pub invocation_id: String,
    /// Function, job or execution name.
    pub function_name: String,
}

impl InvocationContext {
    pub fn new(invocation_id: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            function_name: function_name.into(),
        }
    }

    /// Fresh uuid invocation id.
    pub fn generate(function_name: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), function_name)
    }
}

/// Failure of a stage invocation.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("handoff failed: {0}")]
    Transport(#[from] TransportError),

    #[error("work failed: {0}")]
    Work(#[from] WorkError),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Log the continued (or originated) context at stage entry.
pub(crate) fn log_entry(trace: &ActiveTrace, ctx: &InvocationContext) {
    match trace.parent() {
        Some(parent) => tracing::info!(
            stage = %trace.stage(),
            trace_id = %trace.trace_id(),
            span_id = %trace.span_id(),
            parent_trace_id = %parent.trace_id,
            parent_span_id = %parent.span_id,
            invocation_id = %ctx.invocation_id,
            function = %ctx.function_name,
            "Stage started"
        ),
        None => tracing::info!(
            stage = %trace.stage(),
            trace_id = %trace.trace_id(),
            span_id = %trace.span_id(),
            invocation_id = %ctx.invocation_id,
            function = %ctx.function_name,
            "Stage started without parent"
        ),
    }
}

/// Close the span: record the failure (once), metrics, export.
pub(crate) fn conclude<T>(
    telemetry: &dyn Telemetry,
    trace: ActiveTrace,
    result: Result<T, StageError>,
) -> Result<T, StageError> {
    let stage = trace.stage();
    let elapsed = trace.elapsed();

    match &result {
        Ok(_) => {
            tracing::debug!(
                stage = %stage,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Stage finished"
            );
            metrics::record_stage(stage, Outcome::Success, elapsed);
        }
        Err(e) => {
            telemetry.record_error(&trace, e);
            if let StageError::Transport(transport) = e {
                metrics::record_handoff_failure(stage, transport.kind());
            }
            metrics::record_stage(stage, Outcome::Failure, elapsed);
        }
    }

    telemetry.finish(trace);
    result
}

const NAME_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `<prefix>-<unix millis>-<9 base36 chars>`, unique enough for job and execution names.
pub(crate) fn run_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix)
}

/// Service version reported in stage attributes.
pub(crate) const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
