//! Shared deterministic types for the review loop.
//!
//! These types define stable contracts between the controller, its stages and
//! callers. They carry no I/O and serialize to stable JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::status::StatusCode;

/// Bookkeeping for one completed Worker -> Manager -> classify cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 0-based iteration index within the run.
    pub index: u32,
    /// Status the Manager verdict was classified as.
    pub status: StatusCode,
    /// Raw Worker output for this iteration.
    pub worker_output: String,
}

/// Why a run stopped, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    /// The Manager accepted a Worker result.
    Completed,
    /// The iteration budget ran out before acceptance.
    BudgetExhausted,
    /// The run's cancellation token fired.
    Cancelled,
    /// A collaborator failed; the run was not retried.
    FatalError,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Completed => "COMPLETED",
            TerminationReason::BudgetExhausted => "BUDGET_EXHAUSTED",
            TerminationReason::Cancelled => "CANCELLED",
            TerminationReason::FatalError => "FATAL_ERROR",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loop stage that issued an external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Worker,
    Review,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Worker => f.write_str("worker"),
            Stage::Review => f.write_str("review"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_reason_serializes_as_display() {
        for reason in [
            TerminationReason::Completed,
            TerminationReason::BudgetExhausted,
            TerminationReason::Cancelled,
            TerminationReason::FatalError,
        ] {
            let json = serde_json::to_string(&reason).expect("serialize");
            assert_eq!(json, format!("\"{reason}\""));
        }
    }

    #[test]
    fn iteration_record_json_shape() {
        let record = IterationRecord {
            index: 2,
            status: StatusCode::IncompleteTask,
            worker_output: "half done".to_string(),
        };
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["index"], 2);
        assert_eq!(value["status"], "INCOMPLETE_TASK");
        assert_eq!(value["worker_output"], "half done");
    }
}
