//! Cooperative time slicing.
//!
//! Pipelines are resumable state machines: each call to `step` does bounded
//! units of work, checking a [`FrameBudget`] after every unit, and returns
//! [`Step::Yield`] once the budget is spent. All progress lives in the task
//! struct, so the next tick resumes exactly where the last one stopped.
//! Results never depend on clock precision; a zero budget yields after every
//! unit and still converges to the same outcome.

use std::time::{Duration, Instant};

/// Outcome of one resumable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Budget spent; call again next tick.
    Yield,
    /// The task finished.
    Done,
}

/// Wall-clock allowance for one task during one tick.
#[derive(Debug, Clone, Copy)]
pub struct FrameBudget {
    started: Instant,
    limit: Duration,
}

impl FrameBudget {
    /// Start the clock now.
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// A budget that never runs out. Used for one-shot evaluations and tests.
    pub fn unlimited() -> Self {
        Self::start(Duration::MAX)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the elapsed time reached the limit.
    pub fn exhausted(&self) -> bool {
        self.elapsed() >= self.limit
    }
}

/// Time and yield bookkeeping shared by both pipelines' stats.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SliceClock {
    /// Total wall-clock time spent inside `step`.
    pub total_time: Duration,
    /// Number of times the task yielded before finishing.
    pub yields: usize,
}

impl SliceClock {
    /// Record a yield after `budget` was spent.
    pub fn record_yield(&mut self, budget: &FrameBudget) {
        self.total_time += budget.elapsed();
        self.yields += 1;
    }

    /// Record the final slice.
    pub fn record_finish(&mut self, budget: &FrameBudget) {
        self.total_time += budget.elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let budget = FrameBudget::start(Duration::ZERO);
        assert!(budget.exhausted(), "a zero budget must always be spent");
    }

    #[test]
    fn unlimited_budget_never_runs_out() {
        let budget = FrameBudget::unlimited();
        assert!(!budget.exhausted());
    }

    #[test]
    fn slice_clock_counts_yields_not_finish() {
        let budget = FrameBudget::start(Duration::ZERO);
        let mut clock = SliceClock::default();
        clock.record_yield(&budget);
        clock.record_yield(&budget);
        clock.record_finish(&budget);
        assert_eq!(clock.yields, 2);
    }
}
