//! The span a stage is currently executing under.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::envelope::Stage;
use crate::propagation::carrier::CarriedContext;
use crate::propagation::ids::{SpanId, TraceId};

/// Identifiers of the span that handed work to the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// How the active trace came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOrigin {
    /// Continued from a valid inbound carrier.
    Continued,
    /// No inbound carrier; a new trace was started.
    Originated,
    /// An inbound carrier was present but unusable; a new trace was started.
    Recovered { reason: &'static str },
}

/// A stage's live span: the unit the telemetry capability operates on.
#[derive(Debug, Clone)]
pub struct ActiveTrace {
    stage: Stage,
    trace_id: TraceId,
    span_id: SpanId,
    parent: Option<ParentContext>,
    sampled: bool,
    tracestate: Option<String>,
    origin: TraceOrigin,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl ActiveTrace {
    /// Start a brand new trace.
    pub fn root(stage: Stage) -> Self {
        Self::new(stage, TraceId::random(), None, true, None, TraceOrigin::Originated)
    }

    /// Start a new trace because the inbound carrier could not be used.
    pub fn recovered(stage: Stage, reason: &'static str) -> Self {
        Self::new(
            stage,
            TraceId::random(),
            None,
            true,
            None,
            TraceOrigin::Recovered { reason },
        )
    }

    /// Continue the carried trace as a child of the carried span.
    pub fn child_of(stage: Stage, carried: &CarriedContext) -> Self {
        Self::new(
            stage,
            carried.trace_id,
            Some(ParentContext {
                trace_id: carried.trace_id,
                span_id: carried.span_id,
            }),
            carried.sampled,
            carried.tracestate.clone(),
            TraceOrigin::Continued,
        )
    }

    fn new(
        stage: Stage,
        trace_id: TraceId,
        parent: Option<ParentContext>,
        sampled: bool,
        tracestate: Option<String>,
        origin: TraceOrigin,
    ) -> Self {
        Self {
            stage,
            trace_id,
            span_id: SpanId::random(),
            parent,
            sampled,
            tracestate,
            origin,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn parent(&self) -> Option<&ParentContext> {
        self.parent.as_ref()
    }

    pub fn sampled(&self) -> bool {
        self.sampled
    }

    pub fn origin(&self) -> &TraceOrigin {
        &self.origin
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The context the next hop should continue from: this span, not its parent.
    pub fn outbound(&self) -> CarriedContext {
        CarriedContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            sampled: self.sampled,
            tracestate: self.tracestate.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_has_no_parent() {
        let trace = ActiveTrace::root(Stage::Ingress);
        assert!(trace.parent().is_none());
        assert_eq!(trace.origin(), &TraceOrigin::Originated);
        assert!(trace.sampled());
    }

    #[test]
    fn test_child_keeps_trace_and_renews_span() {
        let carried = CarriedContext::originate();
        let child = ActiveTrace::child_of(Stage::Compute, &carried);

        assert_eq!(child.trace_id(), carried.trace_id);
        assert_ne!(child.span_id(), carried.span_id);
        assert_eq!(child.parent().unwrap().span_id, carried.span_id);
        assert_eq!(child.origin(), &TraceOrigin::Continued);
    }

    #[test]
    fn test_outbound_points_at_current_span() {
        let parent = ActiveTrace::root(Stage::Ingress);
        let outbound = parent.outbound();
        assert_eq!(outbound.span_id, parent.span_id());
        assert_eq!(outbound.trace_id, parent.trace_id());
    }
}
