//! Iteration budget for bounded review loops.

/// Maximum number of Worker/Manager round trips a run may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBudget {
    max_iterations: u32,
}

impl IterationBudget {
    pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// True when iteration `index` (0-based) may not start.
    pub fn is_exhausted(&self, index: u32) -> bool {
        index >= self.max_iterations
    }

    pub fn remaining(&self, index: u32) -> u32 {
        self.max_iterations.saturating_sub(index)
    }
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ITERATIONS)
    }
}
