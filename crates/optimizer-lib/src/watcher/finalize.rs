//! Instance-level finalization once all work has drained

use crate::cost::CostModel;
use crate::engine::{AssignmentResult, SavingsSummary};
use crate::error::{OptimizerError, Result};
use crate::models::{FinalResult, InstanceOutcome, InstanceRecord, OutcomeKind, UnitResult};
use crate::observability::{LifecycleLogger, OptimizerMetrics};
use crate::pool::RatePoolCollection;
use crate::ports::{notify_best_effort, Collaborators, LifecycleEvent};
use std::sync::Arc;
use tracing::debug;

pub struct Finalizer {
    collaborators: Collaborators,
    cost_model: Arc<CostModel>,
    metrics: OptimizerMetrics,
    logger: LifecycleLogger,
}

impl Finalizer {
    pub fn new(collaborators: Collaborators, cost_model: Arc<CostModel>, logger: LifecycleLogger) -> Self {
        Self {
            collaborators,
            cost_model,
            metrics: OptimizerMetrics::new(),
            logger,
        }
    }

    /// Aggregate unit results and move the instance to its terminal status.
    ///
    /// Returns `None` when the instance was already terminal, including when
    /// another finalizer won the status transition.
    pub async fn finalize(&self, instance_id: &str) -> Result<Option<FinalResult>> {
        let store = &self.collaborators.store;
        let record = store
            .instance(instance_id)
            .await?
            .ok_or_else(|| OptimizerError::InstanceNotFound(instance_id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(None);
        }

        let results = store.unit_results(instance_id).await?;
        let statuses = store.unit_statuses(instance_id).await?;
        let unfinished = statuses.values().filter(|s| !s.is_terminal()).count();
        let degraded = results.iter().filter(|r| r.degraded).count();

        let outcome = if unfinished == 0 && degraded == 0 {
            InstanceOutcome::new(
                OutcomeKind::Completed,
                format!("all {} units finished", statuses.len()),
            )
        } else {
            InstanceOutcome::new(
                OutcomeKind::CompletedDegraded,
                format!(
                    "{} of {} units degraded, {} never finished",
                    degraded,
                    statuses.len(),
                    unfinished
                ),
            )
        };

        let best = select_best(&results).cloned();
        let savings = best
            .as_ref()
            .map(|best| self.savings(&record, best))
            .transpose()?;
        let total_cost = best.as_ref().map(|b| b.total_cost);
        let final_result = FinalResult {
            instance_id: instance_id.to_string(),
            outcome: outcome.clone(),
            best,
            savings,
            finalized_at: chrono::Utc::now().timestamp(),
        };

        store.save_final_result(final_result.clone()).await?;
        let status = outcome.status().unwrap_or(record.status);
        if !store
            .transition_instance(instance_id, status, Some(outcome.reason.clone()))
            .await?
        {
            debug!(instance_id = %instance_id, "Instance finalized concurrently");
            return Ok(None);
        }

        self.metrics.inc_instances_finalized(outcome.kind.as_str());
        self.logger
            .log_instance_finalized(instance_id, &outcome, total_cost);
        notify_best_effort(
            self.collaborators.sink.as_ref(),
            LifecycleEvent::Completed {
                instance_id: instance_id.to_string(),
                outcome,
                total_cost,
            },
        )
        .await;

        Ok(Some(final_result))
    }

    fn savings(&self, record: &InstanceRecord, best: &AssignmentResult) -> Result<SavingsSummary> {
        let request = &record.request;
        let catalog = RatePoolCollection::build(&request.plans, &request.devices, &request.settings)?;
        Ok(SavingsSummary::compute(
            &request.devices,
            &catalog,
            &self.cost_model,
            best,
        ))
    }
}

/// Cheapest unit best. Ties go to the pass that a single sequential run
/// would have reached first (strategy, then sequence), so how sequences were
/// batched into units does not change the answer.
pub fn select_best(results: &[UnitResult]) -> Option<&AssignmentResult> {
    results
        .iter()
        .filter_map(|r| r.best.as_ref().map(|best| (r.unit_index, best)))
        .min_by(|(a_index, a), (b_index, b)| {
            a.total_cost
                .cmp(&b.total_cost)
                .then_with(|| a.processing_order().cmp(&b.processing_order()))
                .then_with(|| a_index.cmp(b_index))
        })
        .map(|(_, best)| best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DeviceAssignment, Strategy};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn result(unit_index: usize, cost: Option<Decimal>) -> UnitResult {
        UnitResult {
            unit_ids: vec![format!("inst-u{:04}", unit_index)],
            unit_index,
            best: cost.map(|total_cost| AssignmentResult {
                strategy: Strategy::ALL[0],
                strategy_position: 0,
                sequence_index: unit_index,
                assignments: vec![DeviceAssignment {
                    device_id: "sim-1".to_string(),
                    plan_id: format!("plan-{}", unit_index),
                    cost: total_cost,
                }],
                total_cost,
            }),
            degraded: false,
            passes: 1,
        }
    }

    #[test]
    fn test_select_best_prefers_cost_then_unit_index() {
        let results = vec![
            result(0, Some(dec!(40))),
            result(1, None),
            result(2, Some(dec!(30))),
            result(3, Some(dec!(30))),
        ];
        let best = select_best(&results).unwrap();
        assert_eq!(best.total_cost, dec!(30));
        assert_eq!(best.sequence_index, 2);

        // Storage order does not matter
        let reversed: Vec<UnitResult> = results.into_iter().rev().collect();
        assert_eq!(select_best(&reversed).unwrap().sequence_index, 2);
    }

    #[test]
    fn test_cost_ties_follow_strategy_then_sequence_order() {
        // Unit 0 holds sequence 0, unit 1 holds sequence 1
        let mut results = vec![result(0, Some(dec!(36))), result(1, Some(dec!(36)))];
        for r in &mut results {
            if let Some(best) = r.best.as_mut() {
                best.strategy = Strategy::ALL[best.sequence_index];
                best.strategy_position = 1 - best.sequence_index;
            }
        }
        // Unit 1's result came from the first strategy, so a sequential run
        // would have kept it over unit 0's second-strategy result
        let best = select_best(&results).unwrap();
        assert_eq!(best.strategy_position, 0);
        assert_eq!(best.sequence_index, 1);
    }

    #[test]
    fn test_select_best_without_results() {
        assert!(select_best(&[]).is_none());
        assert!(select_best(&[result(0, None)]).is_none());
    }
}
