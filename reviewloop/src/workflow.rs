//! Worker -> Manager -> classify loop driving one run to a terminal outcome.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::reviewer::ReviewStage;
use crate::agents::worker::WorkerStage;
use crate::agents::{StageCall, StageExchange};
use crate::core::budget::IterationBudget;
use crate::core::classifier::classify;
use crate::core::context::TaskContext;
use crate::core::status::StatusCode;
use crate::core::types::{IterationRecord, Stage, TerminationReason};
use crate::io::config::WorkflowConfig;
use crate::io::executor::{ExecutionError, TaskExecutor};
use crate::io::generator::{GenerationError, TextGenerator};
use crate::io::iteration_log::{IterationMeta, IterationWriteRequest, write_iteration};

const DEFAULT_PROMPT_BUDGET_BYTES: usize = 40_000;

/// Reason why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopStop {
    /// The Manager classified a result as `COMPLETED`.
    Completed,
    /// Every allowed iteration ran without acceptance.
    BudgetExhausted { max_iterations: u32 },
    /// The cancellation token fired before or during an external call.
    Cancelled,
    /// A collaborator failed; nothing was retried.
    Fatal { stage: Stage, message: String },
}

impl LoopStop {
    pub fn termination_reason(&self) -> TerminationReason {
        match self {
            LoopStop::Completed => TerminationReason::Completed,
            LoopStop::BudgetExhausted { .. } => TerminationReason::BudgetExhausted,
            LoopStop::Cancelled => TerminationReason::Cancelled,
            LoopStop::Fatal { .. } => TerminationReason::FatalError,
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowOutcome {
    pub run_id: String,
    /// Text handed back to the caller; annotated when the budget ran out.
    pub final_text: String,
    /// Raw output of the last Worker call, empty if none was made.
    pub last_result: String,
    /// Iterations whose Worker call was issued.
    pub iterations_used: u32,
    /// Status in effect when the loop stopped.
    pub last_status: StatusCode,
    pub stop: LoopStop,
}

impl WorkflowOutcome {
    pub fn termination_reason(&self) -> TerminationReason {
        self.stop.termination_reason()
    }
}

/// Drives the Worker/Manager retry loop.
///
/// Holds only collaborators and read-only settings, so one controller can run
/// any number of independent prompts. All per-run state lives inside [`run`](Self::run).
pub struct WorkflowController<E, G> {
    executor: E,
    generator: G,
    worker: WorkerStage,
    reviewer: ReviewStage,
    iteration_log_dir: Option<PathBuf>,
}

impl<E: TaskExecutor, G: TextGenerator> WorkflowController<E, G> {
    pub fn new(executor: E, generator: G) -> Self {
        Self {
            executor,
            generator,
            worker: WorkerStage::new(DEFAULT_PROMPT_BUDGET_BYTES),
            reviewer: ReviewStage::new(DEFAULT_PROMPT_BUDGET_BYTES),
            iteration_log_dir: None,
        }
    }

    /// Apply prompt budget and iteration log settings from config.
    pub fn from_config(executor: E, generator: G, config: &WorkflowConfig) -> Self {
        let mut controller =
            Self::new(executor, generator).with_prompt_budget(config.prompt_budget_bytes);
        controller.iteration_log_dir = config.iteration_log_dir.clone();
        controller
    }

    pub fn with_prompt_budget(mut self, budget_bytes: usize) -> Self {
        self.worker = WorkerStage::new(budget_bytes);
        self.reviewer = ReviewStage::new(budget_bytes);
        self
    }

    pub fn with_iteration_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.iteration_log_dir = Some(dir.into());
        self
    }

    /// Run the loop for `prompt` until acceptance, budget exhaustion,
    /// cancellation or a collaborator fault.
    ///
    /// `on_iteration` observes every completed Worker -> Manager -> classify cycle.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, max_iterations = budget.max_iterations()))]
    pub fn run<F: FnMut(&IterationRecord)>(
        &self,
        prompt: &str,
        budget: IterationBudget,
        cancel: &CancellationToken,
        mut on_iteration: F,
    ) -> WorkflowOutcome {
        let run_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());

        let mut context = TaskContext::new(prompt);
        let mut status = StatusCode::Init;
        let mut iteration = 0u32;
        let mut iterations_used = 0u32;

        let stop = loop {
            if status.is_terminal() {
                break LoopStop::Completed;
            }
            if budget.is_exhausted(iteration) {
                break LoopStop::BudgetExhausted {
                    max_iterations: budget.max_iterations(),
                };
            }
            if cancel.is_cancelled() {
                break LoopStop::Cancelled;
            }

            let started = Instant::now();
            let call = StageCall {
                run_id: &run_id,
                iteration,
                cancel,
            };

            iterations_used = iteration + 1;
            let work = match self.worker.run(&self.executor, &context, status, call) {
                Ok(work) => work,
                Err(err) => break stage_failure(Stage::Worker, &err, cancel),
            };
            context.record_result(work.response.as_str());

            if cancel.is_cancelled() {
                break LoopStop::Cancelled;
            }
            let review = match self.reviewer.run(
                &self.generator,
                context.last_result(),
                context.original_prompt(),
                call,
            ) {
                Ok(review) => review,
                Err(err) => break stage_failure(Stage::Review, &err, cancel),
            };

            let next = classify(&review.response);
            info!(
                iteration,
                from = %status,
                to = %next,
                remaining = budget.remaining(iteration + 1),
                "iteration classified"
            );
            self.log_iteration(&run_id, iteration, status, next, &work, &review, started);

            on_iteration(&IterationRecord {
                index: iteration,
                status: next,
                worker_output: work.response,
            });
            status = next;
            iteration += 1;
        };

        let last_result = context.into_last_result();
        let final_text = match &stop {
            LoopStop::BudgetExhausted { .. } if !last_result.is_empty() => format!(
                "{last_result}\n\n[iteration limit reached: {iterations_used} iterations, last status {status}]"
            ),
            _ => last_result.clone(),
        };

        match &stop {
            LoopStop::Completed => info!(iterations_used, "run completed"),
            LoopStop::BudgetExhausted { max_iterations } => {
                warn!(max_iterations, last_status = %status, "iteration budget exhausted");
            }
            LoopStop::Cancelled => warn!(iterations_used, "run cancelled"),
            LoopStop::Fatal { stage, message } => {
                warn!(%stage, error = %message, iterations_used, "run aborted by collaborator fault");
            }
        }

        WorkflowOutcome {
            run_id,
            final_text,
            last_result,
            iterations_used,
            last_status: status,
            stop,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_iteration(
        &self,
        run_id: &str,
        iteration: u32,
        feedback: StatusCode,
        status: StatusCode,
        work: &StageExchange,
        review: &StageExchange,
        started: Instant,
    ) {
        let Some(root) = &self.iteration_log_dir else {
            return;
        };
        let meta = IterationMeta {
            run_id: run_id.to_string(),
            iteration,
            feedback,
            status,
            worker_output_bytes: work.response.len(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let written = write_iteration(&IterationWriteRequest {
            root,
            meta: &meta,
            instruction: &work.instruction,
            worker_output: &work.response,
            review_instruction: &review.instruction,
            verdict: &review.response,
        });
        if let Err(err) = written {
            warn!(error = %format!("{err:#}"), iteration, "failed to write iteration log");
        }
    }
}

/// Map a stage error to a stop reason. Cancellation wins over the error itself.
fn stage_failure(stage: Stage, err: &anyhow::Error, cancel: &CancellationToken) -> LoopStop {
    let cancelled = cancel.is_cancelled()
        || err
            .downcast_ref::<ExecutionError>()
            .is_some_and(ExecutionError::is_cancelled)
        || err
            .downcast_ref::<GenerationError>()
            .is_some_and(GenerationError::is_cancelled);
    if cancelled {
        return LoopStop::Cancelled;
    }
    LoopStop::Fatal {
        stage,
        message: format!("{err:#}"),
    }
}

/// Run one prompt to completion with a fresh controller and no cancellation.
pub fn run_workflow<E: TaskExecutor, G: TextGenerator>(
    executor: E,
    generator: G,
    prompt: &str,
    budget: IterationBudget,
) -> WorkflowOutcome {
    WorkflowController::new(executor, generator).run(
        prompt,
        budget,
        &CancellationToken::new(),
        |_| {},
    )
}
