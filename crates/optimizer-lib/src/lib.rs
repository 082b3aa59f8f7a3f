//! Rate plan assignment optimizer
//!
//! This crate provides the core functionality for:
//! - Pricing devices on carrier rate plans, with pooled allowances
//! - Generating candidate plan sequences and units of work
//! - Greedy, strategy-driven assignment with resumable progress
//! - Checkpoint/resume of units across bounded executions
//! - Completion watching and instance finalization
//! - Health checks and observability

pub mod continuation;
pub mod cost;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pool;
pub mod ports;
pub mod runtime;
pub mod sequence;
pub mod settings;
pub mod watcher;

pub use error::{OptimizerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{LifecycleLogger, OptimizerMetrics};
pub use settings::OptimizationSettings;
