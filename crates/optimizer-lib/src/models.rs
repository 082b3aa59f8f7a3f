//! Core data models for the rate plan optimizer

use crate::engine::{AssignmentResult, SavingsSummary};
use crate::sequence::Sequence;
use crate::settings::OptimizationSettings;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Days in a full billing cycle; shorter cycles are prorated against this
pub const DAYS_PER_BILLING_CYCLE: u32 = 30;

fn default_billing_days() -> u32 {
    DAYS_PER_BILLING_CYCLE
}

/// A carrier rate plan: fixed monthly cost plus stepped overage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatePlan {
    pub id: String,
    pub monthly_cost: Decimal,
    pub included_allowance: Decimal,
    pub overage_unit_size: Decimal,
    pub overage_unit_price: Decimal,
    #[serde(default)]
    pub plan_type: String,
    /// Devices on a pooling plan share one combined allowance
    #[serde(default)]
    pub pooling_eligible: bool,
}

/// A billable device (SIM) with its projected usage for the cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub projected_usage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_plan_id: Option<String>,
    /// Optional shared-plan/grouping identifier used by grouped strategies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_key: Option<String>,
    /// Billable days in the cycle, used only when proration is enabled
    #[serde(default = "default_billing_days")]
    pub billing_days: u32,
}

/// Everything needed to start an optimization instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub instance_id: String,
    pub devices: Vec<Device>,
    pub plans: Vec<RatePlan>,
    #[serde(default)]
    pub settings: OptimizationSettings,
}

/// Lifecycle of an optimization instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Completed,
    CompletedDegraded,
    AbortedInvalidCatalog,
    AbortedEmptyInput,
}

impl InstanceStatus {
    /// Terminal statuses are never left once reached
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Pending | InstanceStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::CompletedDegraded => "completed_degraded",
            InstanceStatus::AbortedInvalidCatalog => "aborted_invalid_catalog",
            InstanceStatus::AbortedEmptyInput => "aborted_empty_input",
        }
    }
}

/// Lifecycle of a single unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Queued,
    Running,
    Checkpointed,
    Finished,
    FinishedDegraded,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Finished | UnitStatus::FinishedDegraded)
    }
}

/// How an instance ended, as reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Completed,
    CompletedDegraded,
    AbortedInvalidCatalog,
    AbortedEmptyInput,
    TimedOutWatcher,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::CompletedDegraded => "completed_degraded",
            OutcomeKind::AbortedInvalidCatalog => "aborted_invalid_catalog",
            OutcomeKind::AbortedEmptyInput => "aborted_empty_input",
            OutcomeKind::TimedOutWatcher => "timed_out_watcher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub kind: OutcomeKind,
    pub reason: String,
}

impl InstanceOutcome {
    pub fn new(kind: OutcomeKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Status persisted for this outcome; a watcher timeout leaves the status untouched
    pub fn status(&self) -> Option<InstanceStatus> {
        match self.kind {
            OutcomeKind::Completed => Some(InstanceStatus::Completed),
            OutcomeKind::CompletedDegraded => Some(InstanceStatus::CompletedDegraded),
            OutcomeKind::AbortedInvalidCatalog => Some(InstanceStatus::AbortedInvalidCatalog),
            OutcomeKind::AbortedEmptyInput => Some(InstanceStatus::AbortedEmptyInput),
            OutcomeKind::TimedOutWatcher => None,
        }
    }
}

/// A batch of sequences processed together by one worker invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub id: String,
    pub index: usize,
    /// Indices into the instance's sequence list, in generation order
    pub sequence_indices: Vec<usize>,
}

/// Persisted state of an optimization instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub request: OptimizationRequest,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub sequences: Vec<Sequence>,
    pub units: Vec<UnitOfWork>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl InstanceRecord {
    pub fn new(request: OptimizationRequest, status: InstanceStatus) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            request,
            status,
            reason: None,
            sequences: Vec::new(),
            units: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.request.instance_id
    }

    pub fn unit(&self, unit_id: &str) -> Option<&UnitOfWork> {
        self.units.iter().find(|u| u.id == unit_id)
    }
}

/// Best assignment found by one or more units processed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_ids: Vec<String>,
    /// Lowest unit index among `unit_ids`, used for tie-breaking at finalization
    pub unit_index: usize,
    pub best: Option<AssignmentResult>,
    pub degraded: bool,
    pub passes: u64,
}

/// Outcome of a finalized instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub instance_id: String,
    pub outcome: InstanceOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best: Option<AssignmentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savings: Option<SavingsSummary>,
    pub finalized_at: i64,
}
