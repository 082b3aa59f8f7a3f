//! Greedy assignment of device partitions to rate pools
//!
//! A pass takes one strategy and one sequence, walks the strategy's
//! partitions in order and gives each partition to the pool with the
//! lowest marginal cost given what earlier partitions already consumed.
//! Passes run strategy by strategy, sequence by sequence, and every finished
//! pass is offered to the [`BestResult`] accumulator carried in
//! [`EngineProgress`]. The budget is checked after every partition so a run
//! can stop mid-pass and be resumed later from the same point.

use super::budget::ExecutionBudget;
use super::result::{AssignmentResult, BestResult, DeviceAssignment};
use super::strategy::Strategy;
use crate::cost::CostModel;
use crate::error::{OptimizerError, Result};
use crate::models::Device;
use crate::observability::OptimizerMetrics;
use crate::pool::{PoolQuote, PoolSnapshot, RatePoolCollection};
use crate::sequence::Sequence;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace};

/// State of a pass interrupted between two partitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialPass {
    pub next_partition: usize,
    pub pools: Vec<PoolSnapshot>,
    pub assignments: Vec<DeviceAssignment>,
}

/// Everything needed to continue a run exactly where it stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineProgress {
    pub strategies: Vec<Strategy>,
    pub sequences: Vec<Sequence>,
    pub strategy_cursor: usize,
    pub sequence_cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialPass>,
    pub best: BestResult,
}

impl EngineProgress {
    pub fn new(strategies: Vec<Strategy>, sequences: Vec<Sequence>) -> Self {
        Self {
            strategies,
            sequences,
            strategy_cursor: 0,
            sequence_cursor: 0,
            partial: None,
            best: BestResult::empty(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.sequences.is_empty() || self.strategy_cursor >= self.strategies.len()
    }

    pub fn total_passes(&self) -> usize {
        self.strategies.len() * self.sequences.len()
    }

    pub fn completed_passes(&self) -> usize {
        if self.is_complete() {
            return self.total_passes();
        }
        self.strategy_cursor * self.sequences.len() + self.sequence_cursor
    }

    fn advance(&mut self) {
        self.sequence_cursor += 1;
        if self.sequence_cursor >= self.sequences.len() {
            self.sequence_cursor = 0;
            self.strategy_cursor += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every pass has been evaluated
    Completed,
    /// The budget ran out; the progress must be checkpointed and resumed
    Incomplete,
    /// Nothing to assign
    NoOp,
}

#[derive(Debug, Clone)]
pub struct EngineRun {
    pub progress: EngineProgress,
    pub status: RunStatus,
}

/// Where a pass sits in strategy-major, sequence-minor order
#[derive(Debug, Clone, Copy)]
struct PassPosition {
    strategy: Strategy,
    strategy_position: usize,
    sequence_index: usize,
}

enum PassOutcome {
    Finished(AssignmentResult),
    Suspended(PartialPass),
}

pub struct AssignmentEngine<'a> {
    devices: &'a [Device],
    catalog: &'a RatePoolCollection,
    cost_model: &'a CostModel,
    metrics: OptimizerMetrics,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(
        devices: &'a [Device],
        catalog: &'a RatePoolCollection,
        cost_model: &'a CostModel,
    ) -> Self {
        Self {
            devices,
            catalog,
            cost_model,
            metrics: OptimizerMetrics::new(),
        }
    }

    /// Continue `progress` until every pass is done or the budget runs out
    pub fn run(&self, mut progress: EngineProgress, budget: &mut ExecutionBudget) -> Result<EngineRun> {
        if self.devices.is_empty() {
            return Ok(EngineRun {
                progress,
                status: RunStatus::NoOp,
            });
        }
        if self.catalog.is_empty() {
            return Err(OptimizerError::EmptyRatePoolCollection);
        }

        while !progress.is_complete() {
            let strategy_position = progress.strategy_cursor;
            let strategy = progress.strategies[strategy_position];
            let sequence = &progress.sequences[progress.sequence_cursor];
            let sequence_index = sequence.index;
            let mut pools = self.catalog.for_sequence(&sequence.plan_ids)?;
            if pools.is_empty() {
                return Err(OptimizerError::EmptyRatePoolCollection);
            }

            let (start, assignments) = match progress.partial.take() {
                Some(partial) => {
                    pools.restore(&partial.pools)?;
                    (partial.next_partition, partial.assignments)
                }
                None => (0, Vec::new()),
            };

            let started = Instant::now();
            let pass = PassPosition {
                strategy,
                strategy_position,
                sequence_index,
            };
            match self.run_pass(pass, &mut pools, start, assignments, budget)? {
                PassOutcome::Finished(result) => {
                    self.metrics
                        .observe_pass_latency(started.elapsed().as_secs_f64());
                    self.metrics.inc_passes();
                    let total_cost = result.total_cost;
                    if progress.best.offer(result) {
                        debug!(
                            strategy = %strategy,
                            sequence = sequence_index,
                            total_cost = %total_cost,
                            "New best assignment"
                        );
                    }
                    progress.advance();
                }
                PassOutcome::Suspended(partial) => {
                    trace!(
                        strategy = %strategy,
                        sequence = sequence_index,
                        next_partition = partial.next_partition,
                        "Pass suspended"
                    );
                    progress.partial = Some(partial);
                    return Ok(EngineRun {
                        progress,
                        status: RunStatus::Incomplete,
                    });
                }
            }

            if !progress.is_complete() && budget.is_exhausted() {
                return Ok(EngineRun {
                    progress,
                    status: RunStatus::Incomplete,
                });
            }
        }

        Ok(EngineRun {
            progress,
            status: RunStatus::Completed,
        })
    }

    fn run_pass(
        &self,
        pass: PassPosition,
        pools: &mut RatePoolCollection,
        start: usize,
        mut assignments: Vec<DeviceAssignment>,
        budget: &mut ExecutionBudget,
    ) -> Result<PassOutcome> {
        let partitions = pass.strategy.partition(self.devices);

        for (position, partition) in partitions.iter().enumerate().skip(start) {
            let members: Vec<&Device> = partition.members.iter().map(|&i| &self.devices[i]).collect();
            let (pool_index, quote) = self.cheapest_pool(pools, &members)?;

            let pool = &mut pools.pools_mut()[pool_index];
            pool.commit(&members, &quote);
            let plan_id = pool.plan_id().to_string();
            assignments.extend(members.iter().zip(quote.device_costs).map(|(device, cost)| {
                DeviceAssignment {
                    device_id: device.id.clone(),
                    plan_id: plan_id.clone(),
                    cost,
                }
            }));

            budget.record_step();
            if position + 1 < partitions.len() && budget.is_exhausted() {
                return Ok(PassOutcome::Suspended(PartialPass {
                    next_partition: position + 1,
                    pools: pools.snapshot(),
                    assignments,
                }));
            }
        }

        assignments.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(PassOutcome::Finished(AssignmentResult {
            strategy: pass.strategy,
            strategy_position: pass.strategy_position,
            sequence_index: pass.sequence_index,
            total_cost: pools.total_cost(),
            assignments,
        }))
    }

    /// Pool with the strictly lowest marginal cost; the earlier pool wins ties
    fn cheapest_pool(
        &self,
        pools: &RatePoolCollection,
        members: &[&Device],
    ) -> Result<(usize, PoolQuote)> {
        let mut cheapest: Option<(usize, PoolQuote)> = None;
        for (index, pool) in pools.pools().iter().enumerate() {
            let quote = pool.quote(members, self.cost_model);
            let better = match &cheapest {
                Some((_, current)) => quote.marginal < current.marginal,
                None => true,
            };
            if better {
                cheapest = Some((index, quote));
            }
        }
        cheapest.ok_or(OptimizerError::EmptyRatePoolCollection)
    }
}
