//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pipeline_stage_invocations_total` (counter): invocations by stage, outcome
//! - `pipeline_stage_duration_seconds` (histogram): stage latency by stage
//! - `pipeline_handoff_failures_total` (counter): failed handoffs by stage, kind
//! - `pipeline_propagation_fallbacks_total` (counter): unusable carriers by stage, reason
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so stages and tests
//!   call these helpers unconditionally
//! - Duration buckets cover the 100ms steps up to the multi-second compute job

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::envelope::Stage;

pub const STAGE_INVOCATIONS: &str = "pipeline_stage_invocations_total";
pub const STAGE_DURATION: &str = "pipeline_stage_duration_seconds";
pub const HANDOFF_FAILURES: &str = "pipeline_handoff_failures_total";
pub const PROPAGATION_FALLBACKS: &str = "pipeline_propagation_fallbacks_total";

const DURATION_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Outcome label of a stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(STAGE_DURATION.to_string()),
            &DURATION_BUCKETS,
        )?
        .install()?;

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_stage(stage: Stage, outcome: Outcome, elapsed: Duration) {
    ::metrics::counter!(
        STAGE_INVOCATIONS,
        "stage" => stage.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    ::metrics::histogram!(STAGE_DURATION, "stage" => stage.as_str()).record(elapsed.as_secs_f64());
}

pub fn record_handoff_failure(stage: Stage, kind: &'static str) {
    ::metrics::counter!(HANDOFF_FAILURES, "stage" => stage.as_str(), "kind" => kind).increment(1);
}

pub fn record_propagation_fallback(stage: Stage, reason: &'static str) {
    ::metrics::counter!(
        PROPAGATION_FALLBACKS,
        "stage" => stage.as_str(),
        "reason" => reason
    )
    .increment(1);
}
