//! Worker/Manager review loop.
//!
//! A Worker attempts a task through an external executor, a Manager reviews the
//! result through a text generator, and the verdict is classified into a
//! [`StatusCode`](core::status::StatusCode) that either ends the run or feeds
//! the next attempt. Runs are bounded by an iteration budget.
//!
//! - **[`core`]**: Pure, deterministic logic (status codes, classification,
//!   task context, budget). No I/O.
//! - **[`io`]**: Collaborator processes, prompts, config and iteration logs.
//! - **[`agents`]**: The Worker and Manager stages.
//! - **[`workflow`]**: The controller that ties them together.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
