//! Instance dispatch: validate, generate sequences, fan out units of work

use crate::cost::validate_request;
use crate::engine::strategies_for;
use crate::error::{OptimizerError, Result};
use crate::models::{
    FinalResult, InstanceOutcome, InstanceRecord, InstanceStatus, OptimizationRequest, OutcomeKind,
};
use crate::observability::{LifecycleLogger, OptimizerMetrics};
use crate::pool::RatePoolCollection;
use crate::ports::{
    notify_best_effort, retry_with_backoff, Collaborators, LifecycleEvent, QueueMessage,
    RetryPolicy, WorkQueue,
};
use crate::sequence::{bind_units, SequenceGenerator};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub enqueue_retry: RetryPolicy,
    /// Delay before the first completion poll
    pub first_watch_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enqueue_retry: RetryPolicy::default(),
            first_watch_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Dispatched { units: usize, sequences: usize },
    /// The instance id is already running or finished
    AlreadyDispatched,
    /// Nothing to optimize; recorded as a terminal outcome
    Aborted(InstanceOutcome),
}

pub struct InstanceDispatcher {
    collaborators: Collaborators,
    config: DispatchConfig,
    metrics: OptimizerMetrics,
    logger: LifecycleLogger,
}

impl InstanceDispatcher {
    pub fn new(collaborators: Collaborators, config: DispatchConfig, logger: LifecycleLogger) -> Self {
        Self {
            collaborators,
            config,
            metrics: OptimizerMetrics::new(),
            logger,
        }
    }

    /// Start an instance. An invalid catalog aborts the instance and is
    /// returned as an error; empty input aborts it without one.
    pub async fn dispatch(&self, request: OptimizationRequest) -> Result<DispatchOutcome> {
        let instance_id = request.instance_id.clone();
        let existing = self.collaborators.store.instance(&instance_id).await?;
        if let Some(existing) = &existing {
            if existing.status != InstanceStatus::Pending {
                debug!(instance_id = %instance_id, status = existing.status.as_str(), "Instance already dispatched");
                return Ok(DispatchOutcome::AlreadyDispatched);
            }
        }

        match validate_request(&request) {
            Ok(()) => {}
            Err(e @ OptimizerError::InvalidCatalog { .. }) => {
                let outcome = InstanceOutcome::new(OutcomeKind::AbortedInvalidCatalog, e.to_string());
                self.abort(request, outcome).await?;
                return Err(e);
            }
            Err(OptimizerError::EmptyInput(reason)) => {
                let outcome = InstanceOutcome::new(OutcomeKind::AbortedEmptyInput, reason);
                self.abort(request, outcome.clone()).await?;
                return Ok(DispatchOutcome::Aborted(outcome));
            }
            Err(e) => return Err(e),
        }

        // A Pending record means an earlier dispatch stopped part way;
        // re-sending its messages is absorbed by the unit status checks
        let record = match existing {
            Some(record) => record,
            None => {
                let record = Self::plan_instance(request)?;
                if !self.collaborators.store.create_instance(record.clone()).await? {
                    return Ok(DispatchOutcome::AlreadyDispatched);
                }
                record
            }
        };

        let strategies = strategies_for(
            &record.request.devices,
            record.request.settings.allow_grouping,
        );
        for unit in &record.units {
            let message = QueueMessage::Optimize {
                instance_id: instance_id.clone(),
                unit_ids: vec![unit.id.clone()],
                retry_count: 0,
                strategies: strategies.clone(),
            };
            self.enqueue(&self.collaborators.work_queue, message, Duration::ZERO, "enqueue unit")
                .await?;
        }
        let watch = QueueMessage::WatchCompletion {
            instance_id: instance_id.clone(),
            retry_count: 0,
        };
        self.enqueue(
            &self.collaborators.control_queue,
            watch,
            self.config.first_watch_delay,
            "enqueue watcher",
        )
        .await?;

        self.collaborators
            .store
            .transition_instance(&instance_id, InstanceStatus::Running, None)
            .await?;
        let units = record.units.len();
        let sequences = record.sequences.len();
        self.logger
            .log_instance_started(&instance_id, units, sequences);
        notify_best_effort(
            self.collaborators.sink.as_ref(),
            LifecycleEvent::Started {
                instance_id,
                units,
                sequences,
            },
        )
        .await;

        Ok(DispatchOutcome::Dispatched { units, sequences })
    }

    /// Generate the instance's sequences and bind them to units of work
    pub fn plan_instance(request: OptimizationRequest) -> Result<InstanceRecord> {
        let catalog = RatePoolCollection::build(&request.plans, &request.devices, &request.settings)?;
        let sequences = SequenceGenerator::from_settings(&request.settings).generate(&catalog);
        let units = bind_units(
            &request.instance_id,
            &sequences,
            request.settings.sequences_per_unit,
        );

        let mut record = InstanceRecord::new(request, InstanceStatus::Pending);
        record.sequences = sequences;
        record.units = units;
        Ok(record)
    }

    async fn enqueue(
        &self,
        queue: &Arc<dyn WorkQueue>,
        message: QueueMessage,
        delay: Duration,
        what: &str,
    ) -> Result<()> {
        retry_with_backoff(self.config.enqueue_retry, what, || {
            queue.enqueue(message.clone(), delay)
        })
        .await
    }

    async fn abort(&self, request: OptimizationRequest, outcome: InstanceOutcome) -> Result<()> {
        let instance_id = request.instance_id.clone();
        let store = &self.collaborators.store;
        store
            .create_instance(InstanceRecord::new(request, InstanceStatus::Pending))
            .await?;
        store
            .save_final_result(FinalResult {
                instance_id: instance_id.clone(),
                outcome: outcome.clone(),
                best: None,
                savings: None,
                finalized_at: chrono::Utc::now().timestamp(),
            })
            .await?;
        if let Some(status) = outcome.status() {
            store
                .transition_instance(&instance_id, status, Some(outcome.reason.clone()))
                .await?;
        }

        self.metrics.inc_instances_finalized(outcome.kind.as_str());
        self.logger.log_instance_aborted(&instance_id, &outcome);
        notify_best_effort(
            self.collaborators.sink.as_ref(),
            LifecycleEvent::Aborted {
                instance_id,
                outcome,
            },
        )
        .await;
        Ok(())
    }
}
