//! Savings of an optimized assignment against the devices' current plans

use super::result::AssignmentResult;
use crate::cost::CostModel;
use crate::models::Device;
use crate::pool::RatePoolCollection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsSummary {
    /// Cost of keeping every device on its current plan; absent when any
    /// device has no current plan or it is not in the catalog
    pub baseline_cost: Option<Decimal>,
    pub optimized_cost: Decimal,
    pub savings: Option<Decimal>,
    pub devices_changed: usize,
}

impl SavingsSummary {
    pub fn compute(
        devices: &[Device],
        catalog: &RatePoolCollection,
        model: &CostModel,
        best: &AssignmentResult,
    ) -> Self {
        let baseline_cost = baseline(devices, catalog, model);
        let devices_changed = devices
            .iter()
            .filter(|d| d.current_plan_id.as_deref() != best.plan_for(&d.id))
            .count();

        Self {
            baseline_cost,
            optimized_cost: best.total_cost,
            savings: baseline_cost.map(|b| b - best.total_cost),
            devices_changed,
        }
    }
}

fn baseline(devices: &[Device], catalog: &RatePoolCollection, model: &CostModel) -> Option<Decimal> {
    let mut by_plan: BTreeMap<&str, Vec<&Device>> = BTreeMap::new();
    for device in devices {
        let plan_id = device.current_plan_id.as_deref()?;
        catalog.get(plan_id)?;
        by_plan.entry(plan_id).or_default().push(device);
    }

    let plan_ids: Vec<String> = by_plan.keys().map(|id| id.to_string()).collect();
    let mut pools = catalog.for_sequence(&plan_ids).ok()?;
    for (pool, members) in pools.pools_mut().iter_mut().zip(by_plan.values()) {
        pool.assign(members, model);
    }
    Some(pools.total_cost())
}
