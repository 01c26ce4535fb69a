//! Stage wiring.
//!
//! # Data Flow
//! ```text
//! local.rs:   request → ingress → relay → compute → step A → step B (sequential, one run)
//! workers.rs: ingress → channel → worker loops (one task per envelope) → completed
//! ```
//!
//! Both use the in-memory transports; production deployments supply their own
//! `QueueTransport` / `JobSubmitter` / `WorkflowStarter` and call the stages directly.

pub mod local;
pub mod workers;

pub use local::{LocalPipeline, PipelineError, PipelineRun};
pub use workers::Workers;
