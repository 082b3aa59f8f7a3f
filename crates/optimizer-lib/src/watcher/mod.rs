//! Completion watcher
//!
//! Polls the work queue depth of an instance and finalizes it once nothing
//! is visible, delayed or in flight. Each poll re-enqueues itself on the
//! control queue with a delay that grows when much work remains, and gives
//! up after a fixed number of polls.

mod finalize;


pub use finalize::{select_best, Finalizer};

use crate::cost::CostModel;
use crate::error::{OptimizerError, Result};
use crate::models::FinalResult;
use crate::observability::{LifecycleLogger, OptimizerMetrics};
use crate::ports::{
    notify_best_effort, retry_with_backoff, Collaborators, LifecycleEvent, QueueMessage,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between polls while little work remains (D0)
    pub default_delay: Duration,
    /// Delay between polls once depth exceeds `high_water_depth` (D1)
    pub high_volume_delay: Duration,
    pub high_water_depth: u64,
    /// Polls before the watcher gives up
    pub max_retries: u32,
    /// Longest delay the queue accepts; both delays are clamped to it
    pub max_queue_delay: Duration,
    pub enqueue_retry: RetryPolicy,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(30),
            high_volume_delay: Duration::from_secs(120),
            high_water_depth: 50,
            max_retries: 10,
            max_queue_delay: Duration::from_secs(900),
            enqueue_retry: RetryPolicy::default(),
        }
    }
}

impl WatcherConfig {
    /// Delay before the next poll; an unknown depth is treated as heavy load
    pub fn compute_delay(&self, depth: Option<u64>) -> Duration {
        let delay = match depth {
            Some(depth) if depth <= self.high_water_depth => self.default_delay,
            _ => self.high_volume_delay,
        };
        delay.min(self.max_queue_delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchDecision {
    /// Work drained and this poll finalized the instance
    Finalized(FinalResult),
    /// The instance was already terminal; nothing to do
    AlreadyFinalized,
    /// Work remains; poll again after `delay`
    Retrying {
        delay: Duration,
        next_retry_count: u32,
        depth: Option<u64>,
    },
    /// Retry ceiling reached; the instance keeps its last status
    TimedOut { polls: u32 },
}

pub struct CompletionWatcher {
    collaborators: Collaborators,
    finalizer: Finalizer,
    config: WatcherConfig,
    metrics: OptimizerMetrics,
    logger: LifecycleLogger,
}

impl CompletionWatcher {
    pub fn new(
        collaborators: Collaborators,
        cost_model: Arc<CostModel>,
        config: WatcherConfig,
        logger: LifecycleLogger,
    ) -> Self {
        Self {
            finalizer: Finalizer::new(collaborators.clone(), cost_model, logger.clone()),
            collaborators,
            config,
            metrics: OptimizerMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// One poll: decide, without scheduling anything
    pub async fn poll_once(&self, instance_id: &str, retry_count: u32) -> Result<WatchDecision> {
        let record = self
            .collaborators
            .store
            .instance(instance_id)
            .await?
            .ok_or_else(|| OptimizerError::InstanceNotFound(instance_id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(WatchDecision::AlreadyFinalized);
        }

        self.metrics.inc_watcher_polls();
        let depth = match self.collaborators.work_queue.depth(instance_id).await {
            Ok(depth) => Some(depth.total()),
            Err(e) => {
                warn!(instance_id = %instance_id, error = %e, "Queue depth unavailable");
                None
            }
        };
        if let Some(depth) = depth {
            self.metrics.set_queue_depth(depth);
        }

        if depth == Some(0) {
            self.logger
                .log_watcher_poll(instance_id, retry_count, depth, None);
            return Ok(match self.finalizer.finalize(instance_id).await? {
                Some(result) => WatchDecision::Finalized(result),
                None => WatchDecision::AlreadyFinalized,
            });
        }

        let polls = retry_count + 1;
        if polls >= self.config.max_retries {
            self.logger
                .log_watcher_poll(instance_id, retry_count, depth, None);
            return Ok(WatchDecision::TimedOut { polls });
        }

        let delay = self.config.compute_delay(depth);
        self.logger
            .log_watcher_poll(instance_id, retry_count, depth, Some(delay));
        Ok(WatchDecision::Retrying {
            delay,
            next_retry_count: polls,
            depth,
        })
    }

    /// Process a `WatchCompletion` message, scheduling the next poll if needed
    pub async fn handle(&self, message: &QueueMessage) -> Result<WatchDecision> {
        let QueueMessage::WatchCompletion {
            instance_id,
            retry_count,
        } = message
        else {
            warn!(kind = message.kind(), "Non-watcher message on the control queue");
            return Ok(WatchDecision::AlreadyFinalized);
        };

        let decision = self.poll_once(instance_id, *retry_count).await?;
        match &decision {
            WatchDecision::Retrying {
                delay,
                next_retry_count,
                ..
            } => {
                let next = QueueMessage::WatchCompletion {
                    instance_id: instance_id.clone(),
                    retry_count: *next_retry_count,
                };
                let queue = &self.collaborators.control_queue;
                let enqueued = retry_with_backoff(self.config.enqueue_retry, "enqueue watcher poll", || {
                    queue.enqueue(next.clone(), *delay)
                })
                .await;
                if let Err(e) = enqueued {
                    self.logger
                        .log_requeue_failed(instance_id, "watch_completion", &e.to_string());
                    return Err(e);
                }
            }
            WatchDecision::TimedOut { polls } => {
                self.metrics.inc_watcher_timeouts();
                self.logger.log_watcher_timed_out(instance_id, *polls);
                notify_best_effort(
                    self.collaborators.sink.as_ref(),
                    LifecycleEvent::TimedOut {
                        instance_id: instance_id.clone(),
                        polls: *polls,
                    },
                )
                .await;
            }
            WatchDecision::Finalized(_) | WatchDecision::AlreadyFinalized => {}
        }
        Ok(decision)
    }
}
