//! Shared application state for the agent server.

use std::path::PathBuf;
use std::sync::Arc;

use reviewloop::io::config::WorkflowConfig;
use tokio_util::sync::CancellationToken;

/// Shared state accessible from all request handlers.
///
/// Read-only apart from the shutdown token; every request builds its own
/// workflow controller.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WorkflowConfig>,
    /// Cancelled on shutdown; each run receives a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Directory the task executor saves screenshots into.
    pub fn screenshots_dir(&self) -> PathBuf {
        self.config.server.save_path.clone()
    }
}
