//! Terminal lineage: reconstruct the trace chain from what the envelope already holds.

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, Stage};

/// One hop of the reconstructed chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    pub stage: Stage,
    pub trace_id: String,
    pub span_id: String,
}

impl Envelope {
    /// Ordered `(stage, traceId)` links for every recorded stage. Pure read.
    ///
    /// When the stage that handed off to the last recorded stage left no
    /// result slot, `parentTraceId` stands in for it.
    pub fn trace_chain(&self) -> Vec<ChainLink> {
        let mut chain: Vec<ChainLink> = Stage::ALL
            .into_iter()
            .filter_map(|stage| {
                self.result(stage).map(|result| ChainLink {
                    stage,
                    trace_id: result.trace_id().to_string(),
                    span_id: result.span_id().to_string(),
                })
            })
            .collect();

        if let Some(link) = self.parent_link() {
            let at = chain.len().saturating_sub(1);
            chain.insert(at, link);
        }
        chain
    }

    fn parent_link(&self) -> Option<ChainLink> {
        let parent = self.parent_trace_id.as_ref()?;
        let last = Stage::ALL
            .into_iter()
            .rev()
            .find(|stage| self.result(*stage).is_some())?;
        let predecessor = Stage::ALL.into_iter().rev().find(|stage| *stage < last)?;
        if self.result(predecessor).is_some() {
            return None;
        }
        Some(ChainLink {
            stage: predecessor,
            trace_id: parent.clone(),
            span_id: self.parent_span_id.clone().unwrap_or_default(),
        })
    }

    /// Sum of the processing time recorded by the workflow steps.
    pub fn total_processing_time(&self) -> u64 {
        [self.step_a_result(), self.step_b_result()]
            .into_iter()
            .flatten()
            .map(|step| step.processing_time)
            .sum()
    }

    /// Whether `parentTraceId` agrees with the last recorded stage before `stage`.
    ///
    /// Returns `None` when there is nothing to compare.
    pub fn parent_matches_predecessor(&self, stage: Stage) -> Option<bool> {
        let parent = self.parent_trace_id.as_deref()?;
        let predecessor = Stage::ALL
            .into_iter()
            .filter(|s| *s < stage)
            .rev()
            .find_map(|s| self.result(s))?;
        Some(predecessor.trace_id() == parent)
    }
}
