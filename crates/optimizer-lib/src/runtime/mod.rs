//! Long-running loops and the in-process runner
//!
//! [`WorkerLoop`] pulls units of work from the work queue and hands them to
//! the continuation manager with a fresh budget per message. [`WatcherLoop`]
//! does the same for completion polls on the control queue. [`LocalOptimizer`]
//! drives both queues to exhaustion in-process for one-shot runs.

mod local;
mod worker;

pub use local::{LocalOptimizer, LocalRunReport};
pub use worker::{WatcherLoop, WorkerLoop};

use crate::engine::{ExecutionBudget, DEFAULT_SAFETY_MARGIN};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How much work one invocation may do before it checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetPolicy {
    Unlimited,
    /// Wall-clock budget with a margin kept free for checkpointing
    Deadline { total: Duration, safety_margin: Duration },
    /// A fixed number of partition assignments
    Steps { limit: u64 },
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        BudgetPolicy::Deadline {
            total: Duration::from_secs(15 * 60),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl BudgetPolicy {
    /// Budget for one invocation, starting now
    pub fn start(&self) -> ExecutionBudget {
        match *self {
            BudgetPolicy::Unlimited => ExecutionBudget::unlimited(),
            BudgetPolicy::Deadline {
                total,
                safety_margin,
            } => ExecutionBudget::with_deadline(total, safety_margin),
            BudgetPolicy::Steps { limit } => ExecutionBudget::with_step_limit(limit),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub budget: BudgetPolicy,
    /// Sleep when the queue has nothing visible
    pub idle_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            budget: BudgetPolicy::default(),
            idle_backoff: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_policies() {
        assert!(!BudgetPolicy::Unlimited.start().is_exhausted());

        let mut steps = BudgetPolicy::Steps { limit: 1 }.start();
        steps.record_step();
        assert!(steps.is_exhausted());

        let tight = BudgetPolicy::Deadline {
            total: Duration::from_secs(5),
            safety_margin: Duration::from_secs(10),
        };
        assert!(tight.start().is_exhausted());
    }

    #[test]
    fn test_budget_policy_config_format() {
        let policy: BudgetPolicy = serde_json::from_str(r#"{"kind":"steps","limit":3}"#).unwrap();
        assert_eq!(policy, BudgetPolicy::Steps { limit: 3 });
    }
}
