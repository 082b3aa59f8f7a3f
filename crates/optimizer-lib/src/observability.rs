//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics (pass latency, checkpoints, resumes, watcher polls, queue depth)
//! - Structured JSON lifecycle logging with tracing

use crate::models::InstanceOutcome;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use rust_decimal::Decimal;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Histogram buckets for pass latency (in seconds)
const PASS_LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    pass_latency_seconds: Histogram,
    passes_evaluated: IntCounter,
    units_completed: IntCounter,
    checkpoints_written: IntCounter,
    resumes: IntCounter,
    duplicates_skipped: IntCounter,
    degraded_units: IntCounter,
    watcher_polls: IntCounter,
    watcher_timeouts: IntCounter,
    queue_depth: IntGauge,
    instances_finalized: IntCounterVec,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            pass_latency_seconds: register_histogram!(
                "rate_plan_optimizer_pass_latency_seconds",
                "Time spent evaluating one strategy/sequence pass",
                PASS_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_latency_seconds"),

            passes_evaluated: register_int_counter!(
                "rate_plan_optimizer_passes_evaluated_total",
                "Total number of completed assignment passes"
            )
            .expect("Failed to register passes_evaluated"),

            units_completed: register_int_counter!(
                "rate_plan_optimizer_units_completed_total",
                "Total number of units of work finished"
            )
            .expect("Failed to register units_completed"),

            checkpoints_written: register_int_counter!(
                "rate_plan_optimizer_checkpoints_written_total",
                "Total number of checkpoints written to the cache"
            )
            .expect("Failed to register checkpoints_written"),

            resumes: register_int_counter!(
                "rate_plan_optimizer_resumes_total",
                "Total number of units resumed from a checkpoint"
            )
            .expect("Failed to register resumes"),

            duplicates_skipped: register_int_counter!(
                "rate_plan_optimizer_duplicates_skipped_total",
                "Total number of duplicate or stale deliveries skipped"
            )
            .expect("Failed to register duplicates_skipped"),

            degraded_units: register_int_counter!(
                "rate_plan_optimizer_degraded_units_total",
                "Total number of units finished with a partial result"
            )
            .expect("Failed to register degraded_units"),

            watcher_polls: register_int_counter!(
                "rate_plan_optimizer_watcher_polls_total",
                "Total number of completion watcher polls"
            )
            .expect("Failed to register watcher_polls"),

            watcher_timeouts: register_int_counter!(
                "rate_plan_optimizer_watcher_timeouts_total",
                "Total number of instances whose watcher exhausted its retries"
            )
            .expect("Failed to register watcher_timeouts"),

            queue_depth: register_int_gauge!(
                "rate_plan_optimizer_queue_depth",
                "Most recently observed work queue depth for a watched instance"
            )
            .expect("Failed to register queue_depth"),

            instances_finalized: register_int_counter_vec!(
                "rate_plan_optimizer_instances_finalized_total",
                "Total number of instances finalized, by outcome",
                &["outcome"]
            )
            .expect("Failed to register instances_finalized"),
        }
    }
}

/// Optimizer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_pass_latency(&self, duration_secs: f64) {
        self.inner().pass_latency_seconds.observe(duration_secs);
    }

    pub fn inc_passes(&self) {
        self.inner().passes_evaluated.inc();
    }

    pub fn inc_units_completed(&self, count: u64) {
        self.inner().units_completed.inc_by(count);
    }

    pub fn inc_checkpoints(&self) {
        self.inner().checkpoints_written.inc();
    }

    pub fn inc_resumes(&self) {
        self.inner().resumes.inc();
    }

    pub fn inc_duplicates(&self) {
        self.inner().duplicates_skipped.inc();
    }

    pub fn inc_degraded(&self) {
        self.inner().degraded_units.inc();
    }

    pub fn inc_watcher_polls(&self) {
        self.inner().watcher_polls.inc();
    }

    pub fn inc_watcher_timeouts(&self) {
        self.inner().watcher_timeouts.inc();
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.inner().queue_depth.set(depth as i64);
    }

    pub fn inc_instances_finalized(&self, outcome: &str) {
        self.inner()
            .instances_finalized
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Structured logger for instance and unit lifecycle events
#[derive(Clone)]
pub struct LifecycleLogger {
    worker: String,
}

impl LifecycleLogger {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn log_instance_started(&self, instance_id: &str, units: usize, sequences: usize) {
        info!(
            event = "instance_started",
            worker = %self.worker,
            instance_id = %instance_id,
            units = units,
            sequences = sequences,
            "Optimization instance dispatched"
        );
    }

    pub fn log_instance_aborted(&self, instance_id: &str, outcome: &InstanceOutcome) {
        warn!(
            event = "instance_aborted",
            worker = %self.worker,
            instance_id = %instance_id,
            outcome = ?outcome.kind,
            reason = %outcome.reason,
            "Optimization instance aborted"
        );
    }

    pub fn log_unit_checkpointed(
        &self,
        instance_id: &str,
        unit_ids: &[String],
        generation: u32,
        passes_done: usize,
        passes_total: usize,
    ) {
        info!(
            event = "unit_checkpointed",
            worker = %self.worker,
            instance_id = %instance_id,
            unit_ids = ?unit_ids,
            generation = generation,
            passes_done = passes_done,
            passes_total = passes_total,
            "Unit of work checkpointed before budget exhaustion"
        );
    }

    pub fn log_unit_resumed(&self, instance_id: &str, unit_ids: &[String], generation: u32) {
        info!(
            event = "unit_resumed",
            worker = %self.worker,
            instance_id = %instance_id,
            unit_ids = ?unit_ids,
            generation = generation,
            "Unit of work resumed from checkpoint"
        );
    }

    pub fn log_unit_completed(
        &self,
        instance_id: &str,
        unit_ids: &[String],
        total_cost: Option<Decimal>,
        passes: u64,
    ) {
        info!(
            event = "unit_completed",
            worker = %self.worker,
            instance_id = %instance_id,
            unit_ids = ?unit_ids,
            total_cost = ?total_cost,
            passes = passes,
            "Unit of work completed"
        );
    }

    pub fn log_duplicate_skipped(&self, instance_id: &str, unit_ids: &[String], reason: &str) {
        debug!(
            event = "duplicate_skipped",
            worker = %self.worker,
            instance_id = %instance_id,
            unit_ids = ?unit_ids,
            reason = %reason,
            "Skipped duplicate delivery"
        );
    }

    pub fn log_degraded_completion(&self, instance_id: &str, unit_ids: &[String], reason: &str) {
        warn!(
            event = "degraded_completion",
            worker = %self.worker,
            instance_id = %instance_id,
            unit_ids = ?unit_ids,
            reason = %reason,
            "Unit of work finished with a partial result"
        );
    }

    pub fn log_requeue_failed(&self, instance_id: &str, checkpoint_key: &str, error: &str) {
        error!(
            event = "requeue_failed",
            worker = %self.worker,
            instance_id = %instance_id,
            checkpoint_key = %checkpoint_key,
            error = %error,
            "Failed to requeue checkpointed unit; operator intervention required"
        );
    }

    pub fn log_watcher_poll(
        &self,
        instance_id: &str,
        retry_count: u32,
        depth: Option<u64>,
        next_delay: Option<Duration>,
    ) {
        info!(
            event = "watcher_poll",
            worker = %self.worker,
            instance_id = %instance_id,
            retry_count = retry_count,
            depth = ?depth,
            next_delay_secs = ?next_delay.map(|d| d.as_secs()),
            "Completion watcher polled work queue"
        );
    }

    pub fn log_watcher_timed_out(&self, instance_id: &str, polls: u32) {
        error!(
            event = "watcher_timed_out",
            worker = %self.worker,
            instance_id = %instance_id,
            polls = polls,
            "Completion watcher exhausted its retries; instance left unfinalized"
        );
    }

    pub fn log_instance_finalized(
        &self,
        instance_id: &str,
        outcome: &InstanceOutcome,
        total_cost: Option<Decimal>,
    ) {
        info!(
            event = "instance_finalized",
            worker = %self.worker,
            instance_id = %instance_id,
            outcome = ?outcome.kind,
            reason = %outcome.reason,
            total_cost = ?total_cost,
            "Optimization instance finalized"
        );
    }

    pub fn log_startup(&self, version: &str, workers: usize) {
        info!(
            event = "worker_started",
            worker = %self.worker,
            version = %version,
            workers = workers,
            "Rate plan worker started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "worker_shutdown",
            worker = %self.worker,
            reason = %reason,
            "Rate plan worker shutting down"
        );
    }
}
