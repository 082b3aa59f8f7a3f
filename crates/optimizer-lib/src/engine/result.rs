//! Assignment results and the best-so-far accumulator

use super::strategy::Strategy;
use crate::models::Device;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub device_id: String,
    pub plan_id: String,
    /// Cost attributed to this device within its pool
    pub cost: Decimal,
}

/// A complete assignment of every device to a plan, produced by one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub strategy: Strategy,
    /// Position of `strategy` in the run's strategy list
    #[serde(default)]
    pub strategy_position: usize,
    pub sequence_index: usize,
    /// Sorted by device id
    pub assignments: Vec<DeviceAssignment>,
    pub total_cost: Decimal,
}

impl AssignmentResult {
    /// Rank of the producing pass when strategies are the outer loop and
    /// sequences the inner one; lower ranks win cost ties
    pub fn processing_order(&self) -> (usize, usize) {
        (self.strategy_position, self.sequence_index)
    }

    pub fn plan_for(&self, device_id: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.device_id == device_id)
            .map(|a| a.plan_id.as_str())
    }

    /// Every device appears exactly once and nothing else does
    pub fn covers(&self, devices: &[Device]) -> bool {
        if self.assignments.len() != devices.len() {
            return false;
        }
        let assigned: HashSet<&str> = self.assignments.iter().map(|a| a.device_id.as_str()).collect();
        assigned.len() == devices.len() && devices.iter().all(|d| assigned.contains(d.id.as_str()))
    }
}

/// Lowest-cost result seen so far. Only a strictly cheaper candidate
/// replaces the current best, so earlier strategies and sequences win ties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BestResult {
    best: Option<AssignmentResult>,
    evaluated: u64,
}

impl BestResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Offer a candidate; returns true when it became the new best
    pub fn offer(&mut self, candidate: AssignmentResult) -> bool {
        self.evaluated += 1;
        let improves = match &self.best {
            Some(current) => candidate.total_cost < current.total_cost,
            None => true,
        };
        if improves {
            self.best = Some(candidate);
        }
        improves
    }

    pub fn best(&self) -> Option<&AssignmentResult> {
        self.best.as_ref()
    }

    pub fn total_cost(&self) -> Option<Decimal> {
        self.best.as_ref().map(|b| b.total_cost)
    }

    /// Number of complete passes offered
    pub fn evaluated(&self) -> u64 {
        self.evaluated
    }

    pub fn into_best(self) -> Option<AssignmentResult> {
        self.best
    }
}
