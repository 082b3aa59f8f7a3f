//! Assignment engine
//!
//! Greedy, strategy-driven search for the cheapest assignment of devices
//! to rate plans, resumable at partition granularity.

mod assigner;
mod budget;
mod result;
mod savings;
mod strategy;

#[cfg(test)]
mod tests;

pub use assigner::{AssignmentEngine, EngineProgress, EngineRun, PartialPass, RunStatus};
pub use budget::{ExecutionBudget, DEFAULT_SAFETY_MARGIN};
pub use result::{AssignmentResult, BestResult, DeviceAssignment};
pub use savings::SavingsSummary;
pub use strategy::{strategies_for, Grouping, Partition, Strategy, UsageOrdering};
