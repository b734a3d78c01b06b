//! Worker stage: first-attempt and retry instructions for the task executor.

use anyhow::{Result, bail};
use tracing::{debug, instrument};

use crate::core::context::TaskContext;
use crate::core::status::StatusCode;
use crate::io::executor::{ExecRequest, TaskExecutor};
use crate::io::prompt::{PromptBuilder, WorkerPromptInputs};

use super::{StageCall, StageExchange};

/// Builds Worker instructions and hands them to a [`TaskExecutor`].
#[derive(Debug, Clone)]
pub struct WorkerStage {
    prompts: PromptBuilder,
}

impl WorkerStage {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    /// Render the instruction for `feedback` without calling the executor.
    ///
    /// `Init` yields a first-attempt instruction; any retryable code yields a
    /// retry instruction carrying its reason, the original request and the
    /// previous result. `Completed` is rejected.
    pub fn instruction(
        &self,
        context: &TaskContext,
        feedback: StatusCode,
        iteration: u32,
    ) -> Result<String> {
        if feedback.is_terminal() {
            bail!("worker must not run after the result was accepted");
        }
        let inputs = WorkerPromptInputs {
            original_prompt: context.original_prompt(),
            feedback,
            attempt: iteration,
            previous_result: (feedback.is_retryable() && context.has_result())
                .then(|| context.last_result()),
        };
        let pack = self.prompts.build_worker(&inputs)?;
        debug!(sections = ?pack.section_keys(), "worker sections kept");
        Ok(pack.into_string())
    }

    /// Run one Worker attempt. Executor faults propagate as [`crate::io::executor::ExecutionError`]
    /// inside the returned error.
    #[instrument(skip_all, fields(run_id = call.run_id, iteration = call.iteration, feedback = %feedback))]
    pub fn run<E: TaskExecutor>(
        &self,
        executor: &E,
        context: &TaskContext,
        feedback: StatusCode,
        call: StageCall<'_>,
    ) -> Result<StageExchange> {
        let instruction = self.instruction(context, feedback, call.iteration)?;
        debug!(bytes = instruction.len(), "worker instruction built");

        let request = ExecRequest {
            run_id: call.run_id.to_string(),
            iteration: call.iteration,
            instruction,
            cancel: call.cancel.clone(),
        };
        let response = executor.execute(&request)?;
        Ok(StageExchange {
            instruction: request.instruction,
            response,
        })
    }
}
