//! Cooperative time-slice budgets
//!
//! Long computations (k-NN estimation) run as a sequence of short slices on
//! the interactive thread. A [`SliceBudget`] is created at the start of a
//! slice and polled between units of work.

use std::time::{Duration, Instant};

/// Time allowance for one cooperative slice
#[derive(Clone, Copy, Debug)]
pub struct SliceBudget {
    started: Instant,
    budget: Duration,
}

impl SliceBudget {
    /// Start a slice that may run for `budget`
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Start a slice with a budget in milliseconds
    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// A slice that never runs out (drains work in one call)
    pub fn unlimited() -> Self {
        Self::new(Duration::MAX)
    }

    /// A slice that is already exhausted; callers still get one unit of work
    pub fn exhausted() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Time spent in this slice so far
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the slice should yield
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the slice should yield now
    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.budget
    }
}
