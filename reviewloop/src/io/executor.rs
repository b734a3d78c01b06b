//! Task executor abstraction for the Worker role.
//!
//! The [`TaskExecutor`] trait decouples the review loop from the backend that
//! actually performs the work (a browser-automation agent, a screenshot tool).
//! Tests use scripted executors that return predetermined outputs without
//! spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::io::config::ExecutorConfig;
use crate::io::process::{CommandLimits, command_from_argv, run_command};

/// Parameters for one Worker invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Run the call belongs to.
    pub run_id: String,
    /// 0-based iteration index within the run.
    pub iteration: u32,
    /// Instruction text for the executor.
    pub instruction: String,
    /// Fires when the run is cancelled; long calls should stop early.
    pub cancel: CancellationToken,
}

/// Unrecoverable executor faults. The loop never retries these.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("task executor could not be started: {message}")]
    Unavailable { message: String },

    #[error("task executor failed with exit code {exit_code:?}: {detail}")]
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("task executor timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("task executor call cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecutionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }
}

/// Abstraction over task execution backends.
pub trait TaskExecutor {
    /// Perform the instructed task and return its raw textual result.
    fn execute(&self, request: &ExecRequest) -> Result<String, ExecutionError>;
}

impl<T: TaskExecutor + ?Sized> TaskExecutor for &T {
    fn execute(&self, request: &ExecRequest) -> Result<String, ExecutionError> {
        (**self).execute(request)
    }
}

/// Executor that spawns a configured command and reads its stdout.
///
/// The instruction is written to stdin; `REVIEWLOOP_RUN_ID` and
/// `REVIEWLOOP_ITERATION` are exported to the child.
#[derive(Debug, Clone)]
pub struct CommandTaskExecutor {
    command: Vec<String>,
    limits: CommandLimits,
    workdir: Option<PathBuf>,
}

impl CommandTaskExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            command: config.command.clone(),
            limits: config.limits(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

impl TaskExecutor for CommandTaskExecutor {
    #[instrument(skip_all, fields(run_id = %request.run_id, iteration = request.iteration, program = ?self.command.first()))]
    fn execute(&self, request: &ExecRequest) -> Result<String, ExecutionError> {
        info!("starting task executor");
        let mut cmd = command_from_argv(&self.command).map_err(|err| {
            ExecutionError::Unavailable {
                message: format!("{err:#}"),
            }
        })?;
        cmd.env("REVIEWLOOP_RUN_ID", &request.run_id)
            .env("REVIEWLOOP_ITERATION", request.iteration.to_string());
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = run_command(
            cmd,
            Some(request.instruction.as_bytes()),
            self.limits,
            &request.cancel,
        )
        .map_err(|err| ExecutionError::Unavailable {
            message: format!("{err:#}"),
        })?;

        if output.cancelled {
            return Err(ExecutionError::Cancelled);
        }
        if output.timed_out {
            warn!(timeout_secs = self.limits.timeout.as_secs(), "task executor timed out");
            return Err(ExecutionError::TimedOut {
                timeout: self.limits.timeout,
            });
        }
        if !output.succeeded() {
            warn!(exit_code = ?output.status.code(), "task executor failed");
            return Err(ExecutionError::Failed {
                exit_code: output.status.code(),
                detail: output
                    .stderr_tail()
                    .unwrap_or_else(|| "no stderr output".to_string()),
            });
        }

        let text = output.stdout_text("executor");
        debug!(bytes = text.len(), "task executor completed");
        Ok(text)
    }
}
