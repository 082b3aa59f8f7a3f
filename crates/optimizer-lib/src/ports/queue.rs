//! In-memory work queue with delayed delivery and visibility timeouts

use super::{Delivery, QueueDepth, QueueMessage, WorkQueue};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default time a received message stays hidden before it is redelivered
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct QueuedMessage {
    id: u64,
    message: QueueMessage,
    visible_at: Instant,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<QueuedMessage>,
    /// Keyed by receipt; the instant is the redelivery deadline
    in_flight: HashMap<String, (QueuedMessage, Instant)>,
    next_id: u64,
}

impl QueueState {
    /// Return timed-out in-flight messages to the pending list
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((mut queued, _)) = self.in_flight.remove(&receipt) {
                debug!(receipt = %receipt, kind = queued.message.kind(), "Visibility timeout expired, redelivering");
                queued.visible_at = now;
                self.pending.push(queued);
            }
        }
    }
}

/// At-least-once queue held in process memory
pub struct MemoryWorkQueue {
    state: Mutex<QueueState>,
    visibility_timeout: Duration,
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            visibility_timeout,
        }
    }

    /// All messages held, pending or in flight
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.in_flight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Time until the next pending message becomes visible, if any is delayed
    pub async fn next_visible_in(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .pending
            .iter()
            .map(|q| q.visible_at.saturating_duration_since(now))
            .min()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, message: QueueMessage, delay: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.pending.push(QueuedMessage {
            id,
            message,
            visible_at: Instant::now() + delay,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.reclaim_expired(now);

        // Earliest visible message first, enqueue order on ties
        let next = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, q)| q.visible_at <= now)
            .min_by_key(|(_, q)| (q.visible_at, q.id))
            .map(|(index, _)| index);

        let Some(index) = next else {
            return Ok(None);
        };

        let mut queued = state.pending.remove(index);
        queued.receive_count += 1;
        let receipt = format!("{}-{}", queued.id, queued.receive_count);
        let delivery = Delivery {
            receipt: receipt.clone(),
            message: queued.message.clone(),
            receive_count: queued.receive_count,
        };
        state
            .in_flight
            .insert(receipt, (queued, now + self.visibility_timeout));
        Ok(Some(delivery))
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(receipt).is_none() {
            // Already redelivered under a newer receipt, or acked twice
            debug!(receipt = %receipt, "Ack for unknown receipt ignored");
        }
        Ok(())
    }

    async fn depth(&self, instance_id: &str) -> Result<QueueDepth> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.reclaim_expired(now);

        let mut depth = QueueDepth::default();
        for queued in state.pending.iter().filter(|q| q.message.instance_id() == instance_id) {
            if queued.visible_at <= now {
                depth.visible += 1;
            } else {
                depth.delayed += 1;
            }
        }
        depth.in_flight = state
            .in_flight
            .values()
            .filter(|(q, _)| q.message.instance_id() == instance_id)
            .count() as u64;
        Ok(depth)
    }
}
