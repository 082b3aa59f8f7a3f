//! Single-process runner: dispatch an instance and drain both queues

use super::{BudgetPolicy, LoopConfig, WatcherLoop, WorkerLoop};
use crate::continuation::{ContinuationConfig, ContinuationManager, UnitOutcome};
use crate::cost::CostModel;
use crate::dispatch::{DispatchConfig, DispatchOutcome, InstanceDispatcher};
use crate::error::{OptimizerError, Result};
use crate::models::{FinalResult, InstanceStatus, OptimizationRequest};
use crate::observability::LifecycleLogger;
use crate::ports::{Collaborators, RetryPolicy};
use crate::watcher::{CompletionWatcher, WatchDecision, WatcherConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// What happened during a local run
#[derive(Debug, Clone, Serialize)]
pub struct LocalRunReport {
    pub instance_id: String,
    pub status: InstanceStatus,
    pub final_result: Option<FinalResult>,
    /// Worker invocations, including resumes
    pub invocations: usize,
    pub checkpoints: usize,
    pub watcher_polls: usize,
}

pub struct LocalOptimizer {
    collaborators: Collaborators,
    dispatcher: InstanceDispatcher,
    worker: WorkerLoop,
    watcher: WatcherLoop,
}

impl LocalOptimizer {
    /// In-memory collaborators; watcher polls are not delayed
    pub fn new(cost_model: CostModel, budget: BudgetPolicy) -> Self {
        Self::with_collaborators(Collaborators::in_memory(), cost_model, budget)
    }

    pub fn with_collaborators(collaborators: Collaborators, cost_model: CostModel, budget: BudgetPolicy) -> Self {
        let cost_model = Arc::new(cost_model);
        let logger = LifecycleLogger::new("local");
        let loop_config = LoopConfig {
            budget,
            idle_backoff: Duration::ZERO,
        };

        let dispatcher = InstanceDispatcher::new(
            collaborators.clone(),
            DispatchConfig {
                enqueue_retry: RetryPolicy::none(),
                first_watch_delay: Duration::ZERO,
            },
            logger.clone(),
        );
        let manager = ContinuationManager::new(
            collaborators.clone(),
            cost_model.clone(),
            ContinuationConfig {
                enqueue_retry: RetryPolicy::none(),
                ..ContinuationConfig::default()
            },
            logger.clone(),
        );
        let watcher = CompletionWatcher::new(
            collaborators.clone(),
            cost_model,
            WatcherConfig {
                default_delay: Duration::ZERO,
                high_volume_delay: Duration::ZERO,
                enqueue_retry: RetryPolicy::none(),
                ..WatcherConfig::default()
            },
            logger,
        );

        Self {
            worker: WorkerLoop::new(
                0,
                collaborators.work_queue.clone(),
                Arc::new(manager),
                loop_config.clone(),
            ),
            watcher: WatcherLoop::new(collaborators.control_queue.clone(), Arc::new(watcher), loop_config),
            dispatcher,
            collaborators,
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Dispatch `request` and process every message it produces
    pub async fn run(&self, request: OptimizationRequest) -> Result<LocalRunReport> {
        let instance_id = request.instance_id.clone();
        let mut report = LocalRunReport {
            instance_id: instance_id.clone(),
            status: InstanceStatus::Pending,
            final_result: None,
            invocations: 0,
            checkpoints: 0,
            watcher_polls: 0,
        };

        if let DispatchOutcome::Dispatched { .. } = self.dispatcher.dispatch(request).await? {
            loop {
                while let Some(outcome) = self.worker.poll_once().await? {
                    report.invocations += 1;
                    if matches!(outcome, UnitOutcome::Checkpointed { .. }) {
                        report.checkpoints += 1;
                    }
                }
                let Some(decision) = self.watcher.poll_once().await? else {
                    break;
                };
                report.watcher_polls += 1;
                if !matches!(decision, WatchDecision::Retrying { .. }) {
                    break;
                }
            }
        }

        let store = &self.collaborators.store;
        let record = store
            .instance(&instance_id)
            .await?
            .ok_or_else(|| OptimizerError::InstanceNotFound(instance_id.clone()))?;
        report.status = record.status;
        report.final_result = store.final_result(&instance_id).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, OutcomeKind, RatePlan, DAYS_PER_BILLING_CYCLE};
    use crate::settings::OptimizationSettings;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn request(instance_id: &str, per_unit: usize) -> OptimizationRequest {
        let devices = [dec!(50), dec!(150), dec!(300), dec!(20), dec!(95), dec!(410)]
            .iter()
            .enumerate()
            .map(|(i, usage)| Device {
                id: format!("sim-{}", i),
                projected_usage: *usage,
                current_plan_id: Some("plan-b".to_string()),
                grouping_key: (i % 2 == 0).then(|| "fleet".to_string()),
                billing_days: DAYS_PER_BILLING_CYCLE,
            })
            .collect();
        let plan = |id: &str, cost: Decimal, allowance: Decimal, pooled: bool| RatePlan {
            id: id.to_string(),
            monthly_cost: cost,
            included_allowance: allowance,
            overage_unit_size: dec!(50),
            overage_unit_price: dec!(5),
            plan_type: "data".to_string(),
            pooling_eligible: pooled,
        };
        OptimizationRequest {
            instance_id: instance_id.to_string(),
            devices,
            plans: vec![
                plan("plan-a", dec!(10), dec!(100), false),
                plan("plan-b", dec!(25), dec!(400), false),
                plan("plan-pool", dec!(18), dec!(200), true),
            ],
            settings: OptimizationSettings {
                sequences_per_unit: per_unit,
                ..OptimizationSettings::default()
            },
        }
    }

    #[tokio::test]
    async fn test_local_run_completes() {
        let optimizer = LocalOptimizer::new(CostModel::new(), BudgetPolicy::Unlimited);
        let report = optimizer.run(request("local", 3)).await.unwrap();

        assert_eq!(report.status, InstanceStatus::Completed);
        assert_eq!(report.checkpoints, 0);
        // 7 sequences, 3 per unit
        assert_eq!(report.invocations, 3);
        let final_result = report.final_result.unwrap();
        assert_eq!(final_result.outcome.kind, OutcomeKind::Completed);
        assert!(final_result.savings.unwrap().baseline_cost.is_some());
    }

    #[tokio::test]
    async fn test_checkpoints_do_not_change_the_answer() {
        let uninterrupted = LocalOptimizer::new(CostModel::new(), BudgetPolicy::Unlimited)
            .run(request("a", 2))
            .await
            .unwrap();
        let interrupted = LocalOptimizer::new(CostModel::new(), BudgetPolicy::Steps { limit: 3 })
            .run(request("a", 2))
            .await
            .unwrap();

        assert!(interrupted.checkpoints > 0);
        assert_eq!(interrupted.status, InstanceStatus::Completed);
        assert_eq!(
            interrupted.final_result.unwrap().best,
            uninterrupted.final_result.unwrap().best
        );
    }

    #[tokio::test]
    async fn test_unit_batching_does_not_change_the_answer() {
        let one_unit = LocalOptimizer::new(CostModel::new(), BudgetPolicy::Unlimited)
            .run(request("batched", 100))
            .await
            .unwrap();
        let many_units = LocalOptimizer::new(CostModel::new(), BudgetPolicy::Unlimited)
            .run(request("batched", 1))
            .await
            .unwrap();

        assert_eq!(
            one_unit.final_result.unwrap().best,
            many_units.final_result.unwrap().best
        );
    }

    #[tokio::test]
    async fn test_cost_ties_resolve_the_same_across_batchings() {
        let tied = |per_unit: usize| {
            let devices = [dec!(40), dec!(400), dec!(70)]
                .iter()
                .enumerate()
                .map(|(i, usage)| Device {
                    id: format!("sim-{}", i),
                    projected_usage: *usage,
                    current_plan_id: None,
                    grouping_key: None,
                    billing_days: DAYS_PER_BILLING_CYCLE,
                })
                .collect();
            let plan = |id: &str, cost: Decimal, allowance: Decimal, price: Decimal, pooled: bool| {
                RatePlan {
                    id: id.to_string(),
                    monthly_cost: cost,
                    included_allowance: allowance,
                    overage_unit_size: dec!(1),
                    overage_unit_price: price,
                    plan_type: "data".to_string(),
                    pooling_eligible: pooled,
                }
            };
            OptimizationRequest {
                instance_id: "tied".to_string(),
                devices,
                plans: vec![
                    plan("p0", dec!(14), dec!(150), dec!(1), false),
                    plan("p1", dec!(12), dec!(200), dec!(2), true),
                ],
                settings: OptimizationSettings {
                    sequences_per_unit: per_unit,
                    ..OptimizationSettings::default()
                },
            }
        };

        let mut answers = Vec::new();
        for per_unit in [1, 2, 100] {
            let report = LocalOptimizer::new(CostModel::new(), BudgetPolicy::Unlimited)
                .run(tied(per_unit))
                .await
                .unwrap();
            answers.push(report.final_result.unwrap().best);
        }
        assert!(answers[0].is_some());
        assert_eq!(answers[0], answers[1]);
        assert_eq!(answers[0], answers[2]);
    }

    #[tokio::test]
    async fn test_empty_input_is_reported_not_raised() {
        let mut empty = request("empty", 3);
        empty.devices.clear();
        let report = LocalOptimizer::new(CostModel::new(), BudgetPolicy::Unlimited)
            .run(empty)
            .await
            .unwrap();
        assert_eq!(report.status, InstanceStatus::AbortedEmptyInput);
        assert_eq!(report.invocations, 0);
    }
}
