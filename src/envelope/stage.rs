//! Pipeline stage names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One activation unit of the linear pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Ingress,
    QueueRelay,
    Compute,
    StepA,
    StepB,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Ingress,
        Stage::QueueRelay,
        Stage::Compute,
        Stage::StepA,
        Stage::StepB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingress => "ingress",
            Stage::QueueRelay => "queueRelay",
            Stage::Compute => "compute",
            Stage::StepA => "stepA",
            Stage::StepB => "stepB",
        }
    }

    /// Default service name reported by the stage.
    pub fn service_name(&self) -> &'static str {
        match self {
            Stage::Ingress => "ingress",
            Stage::QueueRelay => "queue-relay",
            Stage::Compute => "compute-job",
            Stage::StepA => "workflow-step-a",
            Stage::StepB => "workflow-step-b",
        }
    }

    /// Name of the envelope field holding this stage's result.
    pub fn result_field(&self) -> &'static str {
        match self {
            Stage::Ingress => "ingressResult",
            Stage::QueueRelay => "queueRelayResult",
            Stage::Compute => "computeResult",
            Stage::StepA => "stepAResult",
            Stage::StepB => "stepBResult",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Ingress => Some(Stage::QueueRelay),
            Stage::QueueRelay => Some(Stage::Compute),
            Stage::Compute => Some(Stage::StepA),
            Stage::StepA => Some(Stage::StepB),
            Stage::StepB => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_follows_next() {
        for pair in Stage::ALL.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(Stage::StepB.next(), None);
    }

    #[test]
    fn test_serde_names_match_display() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
        }
    }
}
