//! Unit-of-work state machine: run, checkpoint, resume, complete
//!
//! Every entry point first checks the persisted terminal markers (instance
//! status, unit statuses) and turns duplicate or late deliveries into
//! logged no-ops.

use super::checkpoint::{checkpoint_key, Checkpoint};
use crate::cost::CostModel;
use crate::engine::{
    strategies_for, AssignmentEngine, AssignmentResult, EngineProgress, ExecutionBudget,
    RunStatus, Strategy,
};
use crate::error::{OptimizerError, Result};
use crate::models::{InstanceRecord, UnitResult, UnitStatus};
use crate::observability::{LifecycleLogger, OptimizerMetrics};
use crate::pool::RatePoolCollection;
use crate::ports::{
    notify_best_effort, retry_with_backoff, Collaborators, LifecycleEvent, QueueMessage,
    RetryPolicy,
};
use crate::sequence::Sequence;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default lifetime of a stored checkpoint
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub struct ContinuationConfig {
    pub checkpoint_ttl: Duration,
    /// Applied to the follow-up `Resume` enqueue
    pub enqueue_retry: RetryPolicy,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            checkpoint_ttl: DEFAULT_CHECKPOINT_TTL,
            enqueue_retry: RetryPolicy::default(),
        }
    }
}

/// What one invocation did with its units of work
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// All passes evaluated and the unit result persisted
    Completed {
        total_cost: Option<Decimal>,
        passes: u64,
    },
    /// Finished with whatever had been found, after a checkpoint failure
    CompletedDegraded { reason: String },
    /// Budget ran out; a `Resume` message for `generation` is queued
    Checkpointed {
        checkpoint_key: String,
        generation: u32,
    },
    /// Duplicate, late or stale delivery
    Skipped { reason: String },
}

impl UnitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Completed { .. } => "completed",
            UnitOutcome::CompletedDegraded { .. } => "completed_degraded",
            UnitOutcome::Checkpointed { .. } => "checkpointed",
            UnitOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Units being processed together, resolved against their instance
struct UnitBatch {
    record: InstanceRecord,
    unit_ids: Vec<String>,
    unit_index: usize,
    sequences: Vec<Sequence>,
}

pub struct ContinuationManager {
    collaborators: Collaborators,
    cost_model: Arc<CostModel>,
    config: ContinuationConfig,
    metrics: OptimizerMetrics,
    logger: LifecycleLogger,
}

impl ContinuationManager {
    pub fn new(
        collaborators: Collaborators,
        cost_model: Arc<CostModel>,
        config: ContinuationConfig,
        logger: LifecycleLogger,
    ) -> Self {
        Self {
            collaborators,
            cost_model,
            config,
            metrics: OptimizerMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &ContinuationConfig {
        &self.config
    }

    /// Process one work-queue message within `budget`
    pub async fn handle(
        &self,
        message: &QueueMessage,
        budget: &mut ExecutionBudget,
    ) -> Result<UnitOutcome> {
        match message {
            QueueMessage::Optimize {
                instance_id,
                unit_ids,
                strategies,
                ..
            } => self.optimize(instance_id, unit_ids, strategies, budget).await,
            QueueMessage::Resume {
                instance_id,
                unit_ids,
                checkpoint_key,
                generation,
                ..
            } => {
                self.resume(instance_id, unit_ids, checkpoint_key, *generation, budget)
                    .await
            }
            QueueMessage::WatchCompletion { instance_id, .. } => {
                warn!(instance_id = %instance_id, "Watcher message delivered to a unit worker");
                Ok(UnitOutcome::Skipped {
                    reason: "watch_completion is handled by the completion watcher".to_string(),
                })
            }
        }
    }

    async fn optimize(
        &self,
        instance_id: &str,
        unit_ids: &[String],
        strategies: &[Strategy],
        budget: &mut ExecutionBudget,
    ) -> Result<UnitOutcome> {
        let batch = match self.load_batch(instance_id, unit_ids).await? {
            Ok(batch) => batch,
            Err(skipped) => return Ok(skipped),
        };

        // A checkpointed unit already has its Resume message in flight
        let statuses = self.collaborators.store.unit_statuses(instance_id).await?;
        if unit_ids
            .iter()
            .any(|id| statuses.get(id) == Some(&UnitStatus::Checkpointed))
        {
            return Ok(self.skip(instance_id, unit_ids, "units already checkpointed"));
        }

        let devices = &batch.record.request.devices;
        let strategies = if strategies.is_empty() {
            strategies_for(devices, batch.record.request.settings.allow_grouping)
        } else {
            strategies.to_vec()
        };
        self.mark_units(instance_id, unit_ids, UnitStatus::Running)
            .await?;

        let progress = EngineProgress::new(strategies, batch.sequences.clone());
        self.run_and_settle(batch, progress, 0, None, budget).await
    }

    async fn resume(
        &self,
        instance_id: &str,
        unit_ids: &[String],
        key: &str,
        generation: u32,
        budget: &mut ExecutionBudget,
    ) -> Result<UnitOutcome> {
        let batch = match self.load_batch(instance_id, unit_ids).await? {
            Ok(batch) => batch,
            Err(skipped) => return Ok(skipped),
        };

        let bytes = match self.collaborators.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return Ok(self.skip(instance_id, unit_ids, "checkpoint already consumed"));
            }
            Err(e) => {
                let reason = format!("checkpoint read failed: {}", e);
                return self.finish_degraded(&batch, None, 0, key, reason).await;
            }
        };
        let checkpoint = match Checkpoint::deserialize(&bytes) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                let reason = format!("checkpoint unusable: {}", e);
                return self.finish_degraded(&batch, None, 0, key, reason).await;
            }
        };
        if checkpoint.generation != generation {
            let reason = format!(
                "stale resume for generation {} (checkpoint is at {})",
                generation, checkpoint.generation
            );
            return Ok(self.skip(instance_id, unit_ids, &reason));
        }

        self.metrics.inc_resumes();
        self.logger
            .log_unit_resumed(instance_id, unit_ids, checkpoint.generation);
        self.mark_units(instance_id, unit_ids, UnitStatus::Running)
            .await?;
        let generation = checkpoint.generation;
        self.run_and_settle(batch, checkpoint.progress, generation, Some(bytes), budget)
            .await
    }

    /// Resolve the instance and units, or the reason this delivery is a no-op
    async fn load_batch(
        &self,
        instance_id: &str,
        unit_ids: &[String],
    ) -> Result<std::result::Result<UnitBatch, UnitOutcome>> {
        let record = self
            .collaborators
            .store
            .instance(instance_id)
            .await?
            .ok_or_else(|| OptimizerError::InstanceNotFound(instance_id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(Err(self.skip(instance_id, unit_ids, "instance already finalized")));
        }

        let statuses = self.collaborators.store.unit_statuses(instance_id).await?;
        let all_finished = unit_ids
            .iter()
            .all(|id| statuses.get(id).map(|s| s.is_terminal()).unwrap_or(false));
        if all_finished {
            return Ok(Err(self.skip(instance_id, unit_ids, "units already finished")));
        }

        let mut unit_index = usize::MAX;
        let mut sequences = Vec::new();
        for unit_id in unit_ids {
            let unit = record
                .unit(unit_id)
                .ok_or_else(|| OptimizerError::UnknownUnit(unit_id.clone()))?;
            unit_index = unit_index.min(unit.index);
            for &index in &unit.sequence_indices {
                let sequence = record.sequences.get(index).ok_or_else(|| {
                    OptimizerError::UnknownUnit(format!("{} (sequence {})", unit_id, index))
                })?;
                sequences.push(sequence.clone());
            }
        }
        if unit_ids.is_empty() {
            unit_index = 0;
        }

        Ok(Ok(UnitBatch {
            record,
            unit_ids: unit_ids.to_vec(),
            unit_index,
            sequences,
        }))
    }

    /// `previous` holds the checkpoint this run resumed from, if any
    async fn run_and_settle(
        &self,
        batch: UnitBatch,
        progress: EngineProgress,
        generation: u32,
        previous: Option<Vec<u8>>,
        budget: &mut ExecutionBudget,
    ) -> Result<UnitOutcome> {
        let run = {
            let request = &batch.record.request;
            let catalog =
                RatePoolCollection::build(&request.plans, &request.devices, &request.settings)?;
            AssignmentEngine::new(&request.devices, &catalog, &self.cost_model).run(progress, budget)?
        };

        match run.status {
            RunStatus::Completed | RunStatus::NoOp => self.complete(&batch, run.progress).await,
            RunStatus::Incomplete => {
                self.checkpoint(&batch, run.progress, generation + 1, previous)
                    .await
            }
        }
    }

    async fn complete(&self, batch: &UnitBatch, progress: EngineProgress) -> Result<UnitOutcome> {
        let instance_id = batch.record.instance_id();
        let passes = progress.best.evaluated();
        let best = progress.best.into_best();
        let total_cost = best.as_ref().map(|b| b.total_cost);

        self.collaborators
            .store
            .save_unit_result(
                instance_id,
                UnitResult {
                    unit_ids: batch.unit_ids.clone(),
                    unit_index: batch.unit_index,
                    best,
                    degraded: false,
                    passes,
                },
            )
            .await?;
        self.mark_units(instance_id, &batch.unit_ids, UnitStatus::Finished)
            .await?;
        self.clear_checkpoint(instance_id, &batch.unit_ids).await;

        self.metrics.inc_units_completed(batch.unit_ids.len() as u64);
        self.logger
            .log_unit_completed(instance_id, &batch.unit_ids, total_cost, passes);
        Ok(UnitOutcome::Completed { total_cost, passes })
    }

    async fn checkpoint(
        &self,
        batch: &UnitBatch,
        progress: EngineProgress,
        generation: u32,
        previous: Option<Vec<u8>>,
    ) -> Result<UnitOutcome> {
        let instance_id = batch.record.instance_id();
        let passes_done = progress.completed_passes();
        let passes_total = progress.total_passes();
        let checkpoint = Checkpoint::new(instance_id, batch.unit_ids.clone(), generation, progress);
        let key = checkpoint.key();

        let written = match checkpoint.serialize() {
            Ok(bytes) => {
                self.collaborators
                    .cache
                    .put(&key, bytes, self.config.checkpoint_ttl)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let reason = format!("checkpoint write failed: {}", e);
            let passes = checkpoint.progress.best.evaluated();
            let best = checkpoint.progress.best.into_best();
            return self.finish_degraded(batch, best, passes, &key, reason).await;
        }

        let resume = QueueMessage::Resume {
            instance_id: instance_id.to_string(),
            unit_ids: batch.unit_ids.clone(),
            checkpoint_key: key.clone(),
            generation,
            retry_count: 0,
        };
        let queue = &self.collaborators.work_queue;
        let enqueued = retry_with_backoff(self.config.enqueue_retry, "enqueue resume", || {
            queue.enqueue(resume.clone(), Duration::ZERO)
        })
        .await;
        if let Err(e) = enqueued {
            self.logger
                .log_requeue_failed(instance_id, &key, &e.to_string());
            // The redelivered message must find the generation it carries
            return match self.restore_checkpoint(&key, previous).await {
                Ok(()) => Err(e),
                Err(restore) => {
                    let reason = format!(
                        "resume enqueue failed ({}) and checkpoint restore failed ({})",
                        e, restore
                    );
                    let passes = checkpoint.progress.best.evaluated();
                    let best = checkpoint.progress.best.into_best();
                    self.finish_degraded(batch, best, passes, &key, reason).await
                }
            };
        }

        self.mark_units(instance_id, &batch.unit_ids, UnitStatus::Checkpointed)
            .await?;
        self.metrics.inc_checkpoints();
        self.logger.log_unit_checkpointed(
            instance_id,
            &batch.unit_ids,
            generation,
            passes_done,
            passes_total,
        );
        notify_best_effort(
            self.collaborators.sink.as_ref(),
            LifecycleEvent::Checkpointed {
                instance_id: instance_id.to_string(),
                unit_ids: batch.unit_ids.clone(),
                generation,
            },
        )
        .await;

        Ok(UnitOutcome::Checkpointed {
            checkpoint_key: key,
            generation,
        })
    }

    /// Persist a partial result and close the units as degraded
    async fn finish_degraded(
        &self,
        batch: &UnitBatch,
        best: Option<AssignmentResult>,
        passes: u64,
        key: &str,
        reason: String,
    ) -> Result<UnitOutcome> {
        let instance_id = batch.record.instance_id();
        self.collaborators
            .store
            .save_unit_result(
                instance_id,
                UnitResult {
                    unit_ids: batch.unit_ids.clone(),
                    unit_index: batch.unit_index,
                    best,
                    degraded: true,
                    passes,
                },
            )
            .await?;
        self.mark_units(instance_id, &batch.unit_ids, UnitStatus::FinishedDegraded)
            .await?;
        if let Err(e) = self.collaborators.cache.delete(key).await {
            debug!(key = %key, error = %e, "Could not remove checkpoint after degraded finish");
        }

        self.metrics.inc_degraded();
        self.logger
            .log_degraded_completion(instance_id, &batch.unit_ids, &reason);
        Ok(UnitOutcome::CompletedDegraded { reason })
    }

    /// Put back the checkpoint a failed requeue replaced
    async fn restore_checkpoint(&self, key: &str, previous: Option<Vec<u8>>) -> Result<()> {
        let cache = &self.collaborators.cache;
        match previous {
            Some(bytes) => cache.put(key, bytes, self.config.checkpoint_ttl).await,
            None => cache.delete(key).await,
        }
    }

    async fn clear_checkpoint(&self, instance_id: &str, unit_ids: &[String]) {
        let key = checkpoint_key(instance_id, unit_ids);
        if let Err(e) = self.collaborators.cache.delete(&key).await {
            warn!(instance_id = %instance_id, key = %key, error = %e, "Failed to delete checkpoint");
        }
    }

    async fn mark_units(&self, instance_id: &str, unit_ids: &[String], status: UnitStatus) -> Result<()> {
        for unit_id in unit_ids {
            self.collaborators
                .store
                .set_unit_status(instance_id, unit_id, status)
                .await?;
        }
        Ok(())
    }

    fn skip(&self, instance_id: &str, unit_ids: &[String], reason: &str) -> UnitOutcome {
        self.metrics.inc_duplicates();
        self.logger
            .log_duplicate_skipped(instance_id, unit_ids, reason);
        UnitOutcome::Skipped {
            reason: reason.to_string(),
        }
    }
}
