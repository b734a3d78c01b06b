//! Per-run task context carried across loop iterations.

/// The original request and the latest Worker output for one run.
///
/// Owned by a single run. The original prompt cannot change after creation;
/// the last result is overwritten once per Worker/Manager cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    original_prompt: String,
    last_result: String,
}

impl TaskContext {
    pub fn new(original_prompt: impl Into<String>) -> Self {
        Self {
            original_prompt: original_prompt.into(),
            last_result: String::new(),
        }
    }

    pub fn original_prompt(&self) -> &str {
        &self.original_prompt
    }

    pub fn last_result(&self) -> &str {
        &self.last_result
    }

    /// True once any Worker output has been recorded.
    pub fn has_result(&self) -> bool {
        !self.last_result.is_empty()
    }

    pub fn record_result(&mut self, worker_output: impl Into<String>) {
        self.last_result = worker_output.into();
    }

    pub fn into_last_result(self) -> String {
        self.last_result
    }
}
