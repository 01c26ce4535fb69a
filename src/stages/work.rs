//! Pluggable unit of work performed by the compute stage and the workflow steps.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::WorkConfig;
use crate::envelope::Stage;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct WorkError(pub String);

/// What a unit of work reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkOutcome {
    /// Processing time the stage records.
    pub duration: Duration,
    pub value: f64,
    pub computation: String,
}

impl WorkOutcome {
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
pub trait Work: Send + Sync {
    async fn perform(&self, stage: Stage) -> Result<WorkOutcome, WorkError>;
}

/// Waits a fixed duration and yields a random value in `0..1000`.
///
/// Reports the nominal duration, not the measured one, so recorded
/// processing times are deterministic.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    duration: Duration,
    computation: String,
}

impl SimulatedWork {
    pub fn new(duration: Duration, computation: impl Into<String>) -> Self {
        Self {
            duration,
            computation: computation.into(),
        }
    }
}

#[async_trait]
impl Work for SimulatedWork {
    async fn perform(&self, stage: Stage) -> Result<WorkOutcome, WorkError> {
        tracing::debug!(
            stage = %stage,
            duration_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            computation = %self.computation,
            "Simulating work"
        );
        tokio::time::sleep(self.duration).await;

        Ok(WorkOutcome {
            duration: self.duration,
            value: rand::thread_rng().gen_range(0.0..1000.0),
            computation: self.computation.clone(),
        })
    }
}

/// Work capabilities for the three stages that perform any.
#[derive(Clone)]
pub struct StageWork {
    pub compute: Arc<dyn Work>,
    pub step_a: Arc<dyn Work>,
    pub step_b: Arc<dyn Work>,
}

impl StageWork {
    /// Simulated work with the configured durations.
    pub fn simulated(config: &WorkConfig) -> Self {
        Self {
            compute: Arc::new(SimulatedWork::new(
                Duration::from_millis(config.compute_ms),
                "matrix_multiplication",
            )),
            step_a: Arc::new(SimulatedWork::new(
                Duration::from_millis(config.step_a_ms),
                "step_a",
            )),
            step_b: Arc::new(SimulatedWork::new(
                Duration::from_millis(config.step_b_ms),
                "step_b",
            )),
        }
    }
}
