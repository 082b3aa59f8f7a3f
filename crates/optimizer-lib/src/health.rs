//! Component health for the worker's liveness and readiness probes
//!
//! Loops report each failed call against the component that failed. A
//! component is degraded after one failure and unhealthy once failures
//! repeat without a success in between; one success restores it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures before a component counts as unhealthy
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 5;

/// Ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but the worker still makes progress
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None, 0)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()), 1)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()), 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; no components is healthy
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const ENGINE: &str = "engine";
    pub const WORK_QUEUE: &str = "work_queue";
    pub const CHECKPOINT_CACHE: &str = "checkpoint_cache";
    pub const WATCHER: &str = "watcher";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared, cloneable view of every component's health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
    unhealthy_after: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_UNHEALTHY_AFTER)
    }

    pub fn with_threshold(unhealthy_after: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            unhealthy_after: unhealthy_after.max(1),
        }
    }

    /// Start tracking `name` as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Count a failed call; escalates to unhealthy once failures repeat
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(name)
            .map_or(0, |c| c.consecutive_failures)
            .saturating_add(1);
        let status = if failures >= self.unhealthy_after {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        state.components.insert(
            name.to_string(),
            ComponentHealth::new(status, Some(message.into()), failures),
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once started, for as long as no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("worker not started".to_string()),
            };
        }

        let mut unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, c)| !c.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        if unhealthy.is_empty() {
            return ReadinessResponse {
                ready: true,
                reason: None,
            };
        }
        unhealthy.sort_unstable();
        ReadinessResponse {
            ready: false,
            reason: Some(format!("unhealthy: {}", unhealthy.join(", "))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_starts_empty_and_not_ready() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::ENGINE).await;
        registry.register(components::WORK_QUEUE).await;
        registry.register(components::CHECKPOINT_CACHE).await;

        registry.set_degraded(components::CHECKPOINT_CACHE, "write failed").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::WORK_QUEUE, "unreachable").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_repeated_failures_escalate() {
        let registry = HealthRegistry::with_threshold(3);
        registry.register(components::WORK_QUEUE).await;
        registry.set_ready(true).await;

        registry.record_failure(components::WORK_QUEUE, "receive failed").await;
        registry.record_failure(components::WORK_QUEUE, "receive failed").await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.components[components::WORK_QUEUE].consecutive_failures, 2);
        assert!(registry.readiness().await.ready);

        registry.record_failure(components::WORK_QUEUE, "receive failed").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("unhealthy: work_queue"));
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let registry = HealthRegistry::with_threshold(2);
        registry.register(components::WATCHER).await;

        registry.record_failure(components::WATCHER, "poll failed").await;
        registry.set_healthy(components::WATCHER).await;
        registry.record_failure(components::WATCHER, "poll failed").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.components[components::WATCHER].message.is_some());

        registry.set_healthy(components::WATCHER).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components[components::WATCHER].message.is_none());
    }

    #[tokio::test]
    async fn test_ready_when_degraded() {
        let registry = HealthRegistry::new();
        registry.register(components::ENGINE).await;
        registry.set_ready(true).await;
        registry.set_degraded(components::ENGINE, "unit degraded").await;

        assert!(registry.readiness().await.ready);
    }
}
