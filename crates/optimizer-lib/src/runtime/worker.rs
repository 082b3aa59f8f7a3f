//! Queue consumer loops

use super::LoopConfig;
use crate::continuation::{ContinuationManager, UnitOutcome};
use crate::error::{OptimizerError, Result};
use crate::health::{components, HealthRegistry};
use crate::ports::{Delivery, WorkQueue};
use crate::watcher::{CompletionWatcher, WatchDecision};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Consumes `Optimize` and `Resume` messages
pub struct WorkerLoop {
    id: usize,
    queue: Arc<dyn WorkQueue>,
    manager: Arc<ContinuationManager>,
    config: LoopConfig,
    health: Option<HealthRegistry>,
}

impl WorkerLoop {
    pub fn new(
        id: usize,
        queue: Arc<dyn WorkQueue>,
        manager: Arc<ContinuationManager>,
        config: LoopConfig,
    ) -> Self {
        Self {
            id,
            queue,
            manager,
            config,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(worker = self.id, "Starting unit worker loop");
        loop {
            tokio::select! {
                processed = self.poll_once() => {
                    match processed {
                        Ok(Some(_)) => {}
                        Ok(None) => tokio::time::sleep(self.config.idle_backoff).await,
                        Err(e) => {
                            warn!(worker = self.id, error = %e, "Work queue receive failed");
                            tokio::time::sleep(self.config.idle_backoff).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(worker = self.id, "Shutting down unit worker loop");
                    break;
                }
            }
        }
    }

    /// Receive and process at most one message
    pub async fn poll_once(&self) -> Result<Option<UnitOutcome>> {
        let received = self.queue.receive().await;
        self.report(components::WORK_QUEUE, received.as_ref().err().map(|e| e.to_string()))
            .await;
        let Some(delivery) = received? else {
            return Ok(None);
        };
        Ok(self.process(delivery).await)
    }

    async fn process(&self, delivery: Delivery) -> Option<UnitOutcome> {
        let mut budget = self.config.budget.start();
        match self.manager.handle(&delivery.message, &mut budget).await {
            Ok(outcome) => {
                debug!(
                    worker = self.id,
                    instance_id = %delivery.message.instance_id(),
                    outcome = outcome.label(),
                    "Message processed"
                );
                self.report(components::ENGINE, None).await;
                self.ack(&delivery).await;
                Some(outcome)
            }
            Err(e) if e.is_retryable() => {
                // Left unacked; the queue redelivers it after the visibility timeout
                warn!(
                    worker = self.id,
                    instance_id = %delivery.message.instance_id(),
                    receive_count = delivery.receive_count,
                    error = %e,
                    "Message failed, leaving it for redelivery"
                );
                self.report(failing_component(&e), Some(e.to_string())).await;
                None
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    instance_id = %delivery.message.instance_id(),
                    kind = delivery.message.kind(),
                    error = %e,
                    "Message cannot be processed, dropping it"
                );
                self.ack(&delivery).await;
                None
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(&delivery.receipt).await {
            warn!(worker = self.id, receipt = %delivery.receipt, error = %e, "Ack failed");
        }
    }

    async fn report(&self, component: &str, failure: Option<String>) {
        if let Some(health) = &self.health {
            match failure {
                Some(message) => health.record_failure(component, message).await,
                None => health.set_healthy(component).await,
            }
        }
    }
}

fn failing_component(error: &OptimizerError) -> &'static str {
    match error {
        OptimizerError::Cache(_) => components::CHECKPOINT_CACHE,
        OptimizerError::Queue(_) => components::WORK_QUEUE,
        _ => components::ENGINE,
    }
}

/// Consumes `WatchCompletion` messages from the control queue
pub struct WatcherLoop {
    queue: Arc<dyn WorkQueue>,
    watcher: Arc<CompletionWatcher>,
    config: LoopConfig,
    health: Option<HealthRegistry>,
}

impl WatcherLoop {
    pub fn new(queue: Arc<dyn WorkQueue>, watcher: Arc<CompletionWatcher>, config: LoopConfig) -> Self {
        Self {
            queue,
            watcher,
            config,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting completion watcher loop");
        loop {
            tokio::select! {
                polled = self.poll_once() => {
                    if !matches!(polled, Ok(Some(_))) {
                        tokio::time::sleep(self.config.idle_backoff).await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down completion watcher loop");
                    break;
                }
            }
        }
    }

    /// Receive and process at most one watcher message
    pub async fn poll_once(&self) -> Result<Option<WatchDecision>> {
        let Some(delivery) = self.queue.receive().await? else {
            return Ok(None);
        };

        match self.watcher.handle(&delivery.message).await {
            Ok(decision) => {
                if let Some(health) = &self.health {
                    match &decision {
                        WatchDecision::TimedOut { polls } => {
                            let message = format!(
                                "instance {} timed out after {} polls",
                                delivery.message.instance_id(),
                                polls
                            );
                            health.set_degraded(components::WATCHER, message).await
                        }
                        _ => health.set_healthy(components::WATCHER).await,
                    }
                }
                self.ack(&delivery).await;
                Ok(Some(decision))
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    instance_id = %delivery.message.instance_id(),
                    error = %e,
                    "Watcher poll failed, leaving it for redelivery"
                );
                if let Some(health) = &self.health {
                    health.record_failure(components::WATCHER, e.to_string()).await;
                }
                Ok(None)
            }
            Err(e) => {
                error!(
                    instance_id = %delivery.message.instance_id(),
                    error = %e,
                    "Watcher message cannot be processed, dropping it"
                );
                self.ack(&delivery).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(&delivery.receipt).await {
            warn!(receipt = %delivery.receipt, error = %e, "Ack failed");
        }
    }
}
