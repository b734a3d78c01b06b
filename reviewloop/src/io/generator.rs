//! Text generation abstraction for the Manager role.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::io::config::GeneratorConfig;
use crate::io::process::{CommandLimits, command_from_argv, run_command};

/// Parameters for one Manager invocation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub run_id: String,
    pub iteration: u32,
    /// Review instruction text.
    pub instruction: String,
    pub cancel: CancellationToken,
}

/// Text generation service faults. The loop never retries these.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text generator could not be started: {message}")]
    Unavailable { message: String },

    #[error("text generator failed with exit code {exit_code:?}: {detail}")]
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("text generator timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("text generator call cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenerationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerationError::Cancelled)
    }
}

/// Abstraction over text generation backends.
pub trait TextGenerator {
    /// Produce a response for the instruction. The text is returned unmodified.
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
        (**self).generate(request)
    }
}

/// Generator that pipes the instruction into a configured LLM command.
#[derive(Debug, Clone)]
pub struct CommandTextGenerator {
    command: Vec<String>,
    limits: CommandLimits,
}

impl CommandTextGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            command: config.command.clone(),
            limits: config.limits(),
        }
    }
}

impl TextGenerator for CommandTextGenerator {
    #[instrument(skip_all, fields(run_id = %request.run_id, iteration = request.iteration, program = ?self.command.first()))]
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
        let unavailable = |err: anyhow::Error| GenerationError::Unavailable {
            message: format!("{err:#}"),
        };
        let cmd = command_from_argv(&self.command).map_err(unavailable)?;
        let output = run_command(
            cmd,
            Some(request.instruction.as_bytes()),
            self.limits,
            &request.cancel,
        )
        .map_err(unavailable)?;

        if output.cancelled {
            return Err(GenerationError::Cancelled);
        }
        if output.timed_out {
            warn!(timeout_secs = self.limits.timeout.as_secs(), "text generator timed out");
            return Err(GenerationError::TimedOut {
                timeout: self.limits.timeout,
            });
        }
        if !output.succeeded() {
            warn!(exit_code = ?output.status.code(), "text generator failed");
            return Err(GenerationError::Failed {
                exit_code: output.status.code(),
                detail: output
                    .stderr_tail()
                    .unwrap_or_else(|| "no stderr output".to_string()),
            });
        }

        let text = output.stdout_text("generator");
        debug!(bytes = text.len(), "text generator responded");
        Ok(text)
    }
}
