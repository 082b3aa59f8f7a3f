//! Collaborator interfaces and their bundled implementations
//!
//! The optimizer core talks to its environment through four traits:
//! - [`WorkQueue`]: delayed, at-least-once delivery with per-instance depth
//! - [`CheckpointCache`]: TTL key/value storage for serialized checkpoints
//! - [`InstanceStore`]: instance, unit and result records with guarded transitions
//! - [`NotificationSink`]: best-effort lifecycle events
//!
//! In-memory implementations back tests and single-process runs; the
//! file-backed cache survives worker restarts.

mod cache;
mod notify;
mod queue;
mod retry;
mod store;

pub use cache::{FileCheckpointCache, MemoryCheckpointCache};
pub use notify::{ChannelNotificationSink, TracingNotificationSink};
pub use queue::MemoryWorkQueue;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use store::MemoryInstanceStore;

use crate::engine::Strategy;
use crate::error::Result;
use crate::models::{FinalResult, InstanceOutcome, InstanceRecord, InstanceStatus, UnitResult, UnitStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Messages carried by the work and control queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueMessage {
    /// Start optimizing one or more units of work from scratch
    Optimize {
        instance_id: String,
        unit_ids: Vec<String>,
        retry_count: u32,
        strategies: Vec<Strategy>,
    },
    /// Continue units from a stored checkpoint
    Resume {
        instance_id: String,
        unit_ids: Vec<String>,
        checkpoint_key: String,
        /// Checkpoint generation this message was issued for
        generation: u32,
        retry_count: u32,
    },
    /// Poll whether an instance's work has drained
    WatchCompletion { instance_id: String, retry_count: u32 },
}

impl QueueMessage {
    pub fn instance_id(&self) -> &str {
        match self {
            QueueMessage::Optimize { instance_id, .. }
            | QueueMessage::Resume { instance_id, .. }
            | QueueMessage::WatchCompletion { instance_id, .. } => instance_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueMessage::Optimize { .. } => "optimize",
            QueueMessage::Resume { .. } => "resume",
            QueueMessage::WatchCompletion { .. } => "watch_completion",
        }
    }
}

/// A received message and the receipt needed to acknowledge it
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub receipt: String,
    pub message: QueueMessage,
    /// How many times this message has been received, including this one
    pub receive_count: u32,
}

/// Outstanding messages for one instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub visible: u64,
    pub delayed: u64,
    pub in_flight: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.visible + self.delayed + self.in_flight
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, message: QueueMessage, delay: Duration) -> Result<()>;

    /// Next visible message, hidden from other receivers until acked or timed out
    async fn receive(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, receipt: &str) -> Result<()>;

    /// Visible, delayed and in-flight messages belonging to `instance_id`
    async fn depth(&self, instance_id: &str) -> Result<QueueDepth>;
}

#[async_trait]
pub trait CheckpointCache: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// `None` when the key is absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a new instance; returns false when the id already exists
    async fn create_instance(&self, record: InstanceRecord) -> Result<bool>;

    async fn instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>>;

    /// Move a non-terminal instance to `status`; returns false when the
    /// instance is already terminal
    async fn transition_instance(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        reason: Option<String>,
    ) -> Result<bool>;

    async fn unit_status(&self, instance_id: &str, unit_id: &str) -> Result<Option<UnitStatus>>;

    async fn unit_statuses(&self, instance_id: &str) -> Result<BTreeMap<String, UnitStatus>>;

    /// Set a unit's status unless it is already terminal; returns whether it changed
    async fn set_unit_status(&self, instance_id: &str, unit_id: &str, status: UnitStatus)
        -> Result<bool>;

    async fn save_unit_result(&self, instance_id: &str, result: UnitResult) -> Result<()>;

    /// Unit results ordered by unit index
    async fn unit_results(&self, instance_id: &str) -> Result<Vec<UnitResult>>;

    async fn save_final_result(&self, result: FinalResult) -> Result<()>;

    async fn final_result(&self, instance_id: &str) -> Result<Option<FinalResult>>;
}

/// Lifecycle events published to interested parties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started {
        instance_id: String,
        units: usize,
        sequences: usize,
    },
    Checkpointed {
        instance_id: String,
        unit_ids: Vec<String>,
        generation: u32,
    },
    Completed {
        instance_id: String,
        outcome: InstanceOutcome,
        total_cost: Option<Decimal>,
    },
    Aborted {
        instance_id: String,
        outcome: InstanceOutcome,
    },
    TimedOut {
        instance_id: String,
        polls: u32,
    },
}

impl LifecycleEvent {
    pub fn instance_id(&self) -> &str {
        match self {
            LifecycleEvent::Started { instance_id, .. }
            | LifecycleEvent::Checkpointed { instance_id, .. }
            | LifecycleEvent::Completed { instance_id, .. }
            | LifecycleEvent::Aborted { instance_id, .. }
            | LifecycleEvent::TimedOut { instance_id, .. } => instance_id,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: LifecycleEvent) -> Result<()>;
}

/// Publish an event, logging instead of failing when the sink is unavailable
pub async fn notify_best_effort(sink: &dyn NotificationSink, event: LifecycleEvent) {
    let instance_id = event.instance_id().to_string();
    if let Err(e) = sink.notify(event).await {
        tracing::warn!(instance_id = %instance_id, error = %e, "Failed to publish lifecycle event");
    }
}

/// The external collaborators shared by dispatcher, workers and watcher
#[derive(Clone)]
pub struct Collaborators {
    /// Carries `Optimize` and `Resume` messages
    pub work_queue: Arc<dyn WorkQueue>,
    /// Carries `WatchCompletion` messages, so watcher polls never count
    /// towards the work queue depth they are waiting on
    pub control_queue: Arc<dyn WorkQueue>,
    pub cache: Arc<dyn CheckpointCache>,
    pub store: Arc<dyn InstanceStore>,
    pub sink: Arc<dyn NotificationSink>,
}

impl Collaborators {
    /// Everything in process memory, events logged through tracing
    pub fn in_memory() -> Self {
        Self {
            work_queue: Arc::new(MemoryWorkQueue::new()),
            control_queue: Arc::new(MemoryWorkQueue::new()),
            cache: Arc::new(MemoryCheckpointCache::new()),
            store: Arc::new(MemoryInstanceStore::new()),
            sink: Arc::new(TracingNotificationSink),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CheckpointCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_message_wire_format() {
        let message = QueueMessage::WatchCompletion {
            instance_id: "inst-1".to_string(),
            retry_count: 3,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "watch_completion");
        assert_eq!(json["retry_count"], 3);
        assert_eq!(message.instance_id(), "inst-1");
    }

    #[test]
    fn test_queue_depth_total() {
        let depth = QueueDepth {
            visible: 2,
            delayed: 3,
            in_flight: 1,
        };
        assert_eq!(depth.total(), 6);
    }
}
