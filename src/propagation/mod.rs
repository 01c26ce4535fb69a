//! Trace context propagation.
//!
//! # Data Flow
//! ```text
//! inbound payload / header / message attribute
//!     → carrier.rs (string map → CarriedContext)
//!     → context.rs (ActiveTrace: child of the carried span, or a new root)
//!     → stage work
//!     → carrier.rs (ActiveTrace → string map for the next hop)
//! ```
//!
//! # Design Decisions
//! - W3C Trace Context layout (`traceparent` / `tracestate`) as the carrier format
//! - Carriers are plain string maps so any transport field can hold them
//! - Decoding failures are values, never panics; callers decide how to degrade

pub mod carrier;
pub mod context;
pub mod ids;

pub use carrier::{CarriedContext, Carrier, PropagationError, TRACEPARENT, TRACESTATE};
pub use context::{ActiveTrace, ParentContext, TraceOrigin};
pub use ids::{SpanId, TraceId};
