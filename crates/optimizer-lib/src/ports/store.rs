//! In-memory instance store

use super::InstanceStore;
use crate::error::{OptimizerError, Result};
use crate::models::{FinalResult, InstanceRecord, InstanceStatus, UnitResult, UnitStatus};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct StoredInstance {
    record: InstanceRecord,
    unit_statuses: BTreeMap<String, UnitStatus>,
    /// Keyed by the first unit id of the batch
    unit_results: BTreeMap<String, UnitResult>,
    final_result: Option<FinalResult>,
}

/// Store backed by a concurrent map; every mutation holds the instance's shard lock
#[derive(Default)]
pub struct MemoryInstanceStore {
    instances: DashMap<String, StoredInstance>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn missing(instance_id: &str) -> OptimizerError {
        OptimizerError::InstanceNotFound(instance_id.to_string())
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn create_instance(&self, record: InstanceRecord) -> Result<bool> {
        match self.instances.entry(record.instance_id().to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let unit_statuses = record
                    .units
                    .iter()
                    .map(|u| (u.id.clone(), UnitStatus::Queued))
                    .collect();
                slot.insert(StoredInstance {
                    record,
                    unit_statuses,
                    unit_results: BTreeMap::new(),
                    final_result: None,
                });
                Ok(true)
            }
        }
    }

    async fn instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        Ok(self.instances.get(instance_id).map(|s| s.record.clone()))
    }

    async fn transition_instance(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        reason: Option<String>,
    ) -> Result<bool> {
        let mut stored = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        if stored.record.status.is_terminal() {
            return Ok(false);
        }
        stored.record.status = status;
        stored.record.reason = reason;
        stored.record.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn unit_status(&self, instance_id: &str, unit_id: &str) -> Result<Option<UnitStatus>> {
        let stored = self
            .instances
            .get(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        Ok(stored.unit_statuses.get(unit_id).copied())
    }

    async fn unit_statuses(&self, instance_id: &str) -> Result<BTreeMap<String, UnitStatus>> {
        let stored = self
            .instances
            .get(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        Ok(stored.unit_statuses.clone())
    }

    async fn set_unit_status(
        &self,
        instance_id: &str,
        unit_id: &str,
        status: UnitStatus,
    ) -> Result<bool> {
        let mut stored = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        let current = stored.unit_statuses.get(unit_id).copied();
        if current.map(|s| s.is_terminal()).unwrap_or(false) {
            return Ok(false);
        }
        stored.unit_statuses.insert(unit_id.to_string(), status);
        stored.record.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn save_unit_result(&self, instance_id: &str, result: UnitResult) -> Result<()> {
        let mut stored = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        let key = result
            .unit_ids
            .first()
            .cloned()
            .ok_or_else(|| OptimizerError::Store("unit result without unit ids".to_string()))?;
        stored.unit_results.insert(key, result);
        Ok(())
    }

    async fn unit_results(&self, instance_id: &str) -> Result<Vec<UnitResult>> {
        let stored = self
            .instances
            .get(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        let mut results: Vec<UnitResult> = stored.unit_results.values().cloned().collect();
        results.sort_by_key(|r| r.unit_index);
        Ok(results)
    }

    async fn save_final_result(&self, result: FinalResult) -> Result<()> {
        let mut stored = self
            .instances
            .get_mut(&result.instance_id)
            .ok_or_else(|| Self::missing(&result.instance_id))?;
        stored.final_result = Some(result);
        Ok(())
    }

    async fn final_result(&self, instance_id: &str) -> Result<Option<FinalResult>> {
        let stored = self
            .instances
            .get(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        Ok(stored.final_result.clone())
    }
}
