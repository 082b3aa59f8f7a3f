//! Notification sinks

use super::{LifecycleEvent, NotificationSink};
use crate::error::{OptimizerError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// Sink that only records events in the structured log
#[derive(Debug, Clone, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, event: LifecycleEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        info!(
            event = "lifecycle_notification",
            instance_id = %event.instance_id(),
            payload = %payload,
            "Lifecycle notification"
        );
        Ok(())
    }
}

/// Sink forwarding events to an in-process channel
#[derive(Debug, Clone)]
pub struct ChannelNotificationSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelNotificationSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn notify(&self, event: LifecycleEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| OptimizerError::Notification("receiver dropped".to_string()))
    }
}
