//! Execution budget checked by the engine after every partition

use std::time::{Duration, Instant};

/// Default margin kept free for serializing and enqueueing a checkpoint
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Remaining time (and optionally steps) an invocation may spend
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    deadline: Option<Instant>,
    safety_margin: Duration,
    step_limit: Option<u64>,
    steps: u64,
}

impl ExecutionBudget {
    /// No deadline and no step limit
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            safety_margin: Duration::ZERO,
            step_limit: None,
            steps: 0,
        }
    }

    /// Budget ending `total` from now; the engine yields once less than
    /// `safety_margin` remains
    pub fn with_deadline(total: Duration, safety_margin: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + total),
            safety_margin,
            step_limit: None,
            steps: 0,
        }
    }

    /// Yield after `steps` partition assignments
    pub fn with_step_limit(steps: u64) -> Self {
        Self {
            step_limit: Some(steps),
            ..Self::unlimited()
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    /// True when the invocation should stop and checkpoint
    pub fn is_exhausted(&self) -> bool {
        let out_of_time = self
            .remaining()
            .map(|left| left < self.safety_margin)
            .unwrap_or(false);
        let out_of_steps = self
            .step_limit
            .map(|limit| self.steps >= limit)
            .unwrap_or(false);
        out_of_time || out_of_steps
    }
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_budget_never_exhausts() {
        let mut budget = ExecutionBudget::unlimited();
        for _ in 0..10_000 {
            budget.record_step();
        }
        assert!(!budget.is_exhausted());
        assert!(budget.remaining().is_none());
    }

    #[test]
    fn test_step_limit() {
        let mut budget = ExecutionBudget::with_step_limit(2);
        budget.record_step();
        assert!(!budget.is_exhausted());
        budget.record_step();
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_deadline_inside_safety_margin_is_exhausted() {
        let budget = ExecutionBudget::with_deadline(Duration::from_secs(5), Duration::from_secs(30));
        assert!(budget.is_exhausted());

        let budget =
            ExecutionBudget::with_deadline(Duration::from_secs(600), Duration::from_secs(30));
        assert!(!budget.is_exhausted());
    }
}
