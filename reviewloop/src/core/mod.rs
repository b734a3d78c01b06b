//! Deterministic, pure logic shared by the review loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod context;
pub mod status;
pub mod types;
