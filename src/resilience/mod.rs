//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Stage handoff (enqueue / submit job / start execution):
//!     → timeouts.rs (enforce handoff deadline)
//!     → On failure: error recorded once on the stage span, surfaced to caller
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries: a handoff is not idempotent (a retried enqueue may duplicate
//!   the envelope downstream)

pub mod timeouts;

pub use timeouts::with_deadline;
