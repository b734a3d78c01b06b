//! I/O boundaries: collaborator processes, config, prompts and iteration logs.

pub mod config;
pub mod executor;
pub mod generator;
pub mod iteration_log;
pub mod process;
pub mod prompt;
