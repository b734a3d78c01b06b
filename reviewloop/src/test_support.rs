//! Scripted collaborators for driving the review loop in tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use crate::io::executor::{ExecRequest, ExecutionError, TaskExecutor};
use crate::io::generator::{GenerateRequest, GenerationError, TextGenerator};

/// One scripted collaborator reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with an unrecoverable fault carrying this detail.
    Fail(String),
    /// Cancel the given token, then return this text.
    CancelThen(CancellationToken, String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        ScriptedReply::Fail(detail.into())
    }
}

#[derive(Debug)]
struct Script {
    queue: Mutex<VecDeque<ScriptedReply>>,
    repeat: Option<String>,
    instructions: Mutex<Vec<String>>,
}

impl Script {
    fn new(replies: Vec<ScriptedReply>, repeat: Option<String>) -> Self {
        Self {
            queue: Mutex::new(replies.into()),
            repeat,
            instructions: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, instruction: &str) -> Option<ScriptedReply> {
        self.instructions
            .lock()
            .expect("instructions lock")
            .push(instruction.to_string());
        let scripted = self.queue.lock().expect("queue lock").pop_front();
        scripted.or_else(|| self.repeat.clone().map(ScriptedReply::Text))
    }

    fn instructions(&self) -> Vec<String> {
        self.instructions.lock().expect("instructions lock").clone()
    }
}

/// Task executor that replays queued replies in order.
///
/// Once the queue is empty it repeats its fallback text, or errors if none was set.
#[derive(Debug)]
pub struct ScriptedExecutor {
    script: Script,
}

impl ScriptedExecutor {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            script: Script::new(replies, None),
        }
    }

    /// Reply with `text` on every call.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            script: Script::new(Vec::new(), Some(text.into())),
        }
    }

    /// Every instruction received, in call order.
    pub fn instructions(&self) -> Vec<String> {
        self.script.instructions()
    }

    pub fn calls(&self) -> usize {
        self.script.instructions().len()
    }
}

impl TaskExecutor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest) -> Result<String, ExecutionError> {
        match self.script.next(&request.instruction) {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(detail)) => Err(ExecutionError::Failed {
                exit_code: Some(1),
                detail,
            }),
            Some(ScriptedReply::CancelThen(token, text)) => {
                token.cancel();
                Ok(text)
            }
            None => Err(ExecutionError::Other(anyhow!(
                "scripted executor has no reply for call {}",
                self.calls()
            ))),
        }
    }
}

/// Text generator that replays queued verdicts in order.
#[derive(Debug)]
pub struct ScriptedGenerator {
    script: Script,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            script: Script::new(replies, None),
        }
    }

    /// Shorthand for a queue of plain verdict texts.
    pub fn verdicts(verdicts: &[&str]) -> Self {
        Self::new(verdicts.iter().map(|v| ScriptedReply::text(*v)).collect())
    }

    pub fn always(text: impl Into<String>) -> Self {
        Self {
            script: Script::new(Vec::new(), Some(text.into())),
        }
    }

    pub fn instructions(&self) -> Vec<String> {
        self.script.instructions()
    }

    pub fn calls(&self) -> usize {
        self.script.instructions().len()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
        match self.script.next(&request.instruction) {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(GenerationError::Unavailable { message }),
            Some(ScriptedReply::CancelThen(token, text)) => {
                token.cancel();
                Ok(text)
            }
            None => Err(GenerationError::Other(anyhow!(
                "scripted generator has no reply for call {}",
                self.calls()
            ))),
        }
    }
}
