//! Stable exit codes for the `reviewloop` CLI.

use crate::core::types::TerminationReason;

/// The Manager accepted a result, or a non-run command succeeded.
pub const OK: i32 = 0;
/// Invalid input or config, or the run hit a collaborator fault.
pub const INVALID: i32 = 1;
/// The iteration budget ran out before acceptance.
pub const BUDGET_EXHAUSTED: i32 = 2;
/// The run was cancelled.
pub const CANCELLED: i32 = 3;

pub fn for_termination(reason: TerminationReason) -> i32 {
    match reason {
        TerminationReason::Completed => OK,
        TerminationReason::BudgetExhausted => BUDGET_EXHAUSTED,
        TerminationReason::Cancelled => CANCELLED,
        TerminationReason::FatalError => INVALID,
    }
}
