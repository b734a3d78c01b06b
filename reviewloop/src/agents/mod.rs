//! Worker and Manager roles: build an instruction, delegate, return raw text.

use tokio_util::sync::CancellationToken;

pub mod reviewer;
pub mod worker;

/// Identifies one collaborator call within a run.
#[derive(Debug, Clone, Copy)]
pub struct StageCall<'a> {
    pub run_id: &'a str,
    /// 0-based iteration index.
    pub iteration: u32,
    pub cancel: &'a CancellationToken,
}

/// Instruction sent to a collaborator together with its raw reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageExchange {
    pub instruction: String,
    pub response: String,
}
