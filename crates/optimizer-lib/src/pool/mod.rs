//! Rate pools and pool collections
//!
//! A [`RatePool`] is one rate plan together with the devices assigned to it
//! during a pass. Pools on pooling-eligible plans share a combined allowance
//! (plan allowance times member count), so the cost of adding devices depends
//! on what earlier partitions already consumed.

use crate::cost::{BillingPeriod, CostModel};
use crate::error::{OptimizerError, Result};
use crate::models::{Device, RatePlan};
use crate::settings::OptimizationSettings;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Mutable, per-pass state of a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    /// Device ids in assignment order
    pub members: Vec<String>,
    /// Sum of base cost and surcharges over members
    pub fixed_total: Decimal,
    pub usage_total: Decimal,
    /// Sum of standalone device costs; only meaningful for non-pooling plans
    pub standalone_total: Decimal,
}

/// Pool state tagged with its plan, as stored in checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub plan_id: String,
    pub state: PoolState,
}

/// Price of adding a partition to a pool, computed without mutating it
#[derive(Debug, Clone, PartialEq)]
pub struct PoolQuote {
    pub marginal: Decimal,
    /// Cost attributed to each device of the partition, in partition order
    pub device_costs: Vec<Decimal>,
    fixed_delta: Decimal,
    usage_delta: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatePool {
    plan: RatePlan,
    capacity_threshold: Decimal,
    prorate: bool,
    state: PoolState,
}

impl RatePool {
    pub fn new(plan: RatePlan, capacity_threshold: Decimal, prorate: bool) -> Self {
        Self {
            plan,
            capacity_threshold,
            prorate,
            state: PoolState::default(),
        }
    }

    pub fn plan(&self) -> &RatePlan {
        &self.plan
    }

    pub fn plan_id(&self) -> &str {
        &self.plan.id
    }

    pub fn is_pooled(&self) -> bool {
        self.plan.pooling_eligible
    }

    pub fn capacity_threshold(&self) -> Decimal {
        self.capacity_threshold
    }

    /// Allowance that projected usage can actually consume
    pub fn useful_allowance(&self) -> Decimal {
        self.plan.included_allowance.min(self.capacity_threshold)
    }

    /// Cost per useful unit of allowance; lower is better, `None` when nothing is usable
    pub fn effectiveness(&self) -> Option<Decimal> {
        let useful = self.useful_allowance();
        if useful <= Decimal::ZERO {
            None
        } else {
            Some(self.plan.monthly_cost / useful)
        }
    }

    pub fn members(&self) -> &[String] {
        &self.state.members
    }

    pub fn len(&self) -> usize {
        self.state.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.members.is_empty()
    }

    pub fn total_cost(&self) -> Decimal {
        if self.is_pooled() {
            self.state.fixed_total + self.pooled_overage(self.state.usage_total, self.len())
        } else {
            self.state.standalone_total
        }
    }

    /// Price `devices` as one partition added to the current pool contents
    pub fn quote(&self, devices: &[&Device], model: &CostModel) -> PoolQuote {
        if self.is_pooled() {
            let mut device_costs = Vec::with_capacity(devices.len());
            let mut fixed_delta = Decimal::ZERO;
            let mut usage_delta = Decimal::ZERO;
            for device in devices {
                let fixed = model.fixed_cost(device, &self.plan, self.period(device));
                fixed_delta += fixed;
                usage_delta += device.projected_usage;
                device_costs.push(fixed);
            }

            let before = self.pooled_overage(self.state.usage_total, self.len());
            let after = self.pooled_overage(
                self.state.usage_total + usage_delta,
                self.len() + devices.len(),
            );
            let overage_delta = after - before;
            if let Some(last) = device_costs.last_mut() {
                *last += overage_delta;
            }

            PoolQuote {
                marginal: fixed_delta + overage_delta,
                device_costs,
                fixed_delta,
                usage_delta,
            }
        } else {
            let device_costs: Vec<Decimal> = devices
                .iter()
                .map(|d| model.cost(d, &self.plan, self.period(d)))
                .collect();
            let marginal = device_costs.iter().copied().sum();
            PoolQuote {
                marginal,
                device_costs,
                fixed_delta: Decimal::ZERO,
                usage_delta: devices.iter().map(|d| d.projected_usage).sum(),
            }
        }
    }

    /// Apply a quote previously computed for the same `devices`
    pub fn commit(&mut self, devices: &[&Device], quote: &PoolQuote) {
        self.state
            .members
            .extend(devices.iter().map(|d| d.id.clone()));
        self.state.fixed_total += quote.fixed_delta;
        self.state.usage_total += quote.usage_delta;
        if !self.is_pooled() {
            self.state.standalone_total += quote.marginal;
        }
    }

    pub fn assign(&mut self, devices: &[&Device], model: &CostModel) -> PoolQuote {
        let quote = self.quote(devices, model);
        self.commit(devices, &quote);
        quote
    }

    pub fn reset(&mut self) {
        self.state = PoolState::default();
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            plan_id: self.plan.id.clone(),
            state: self.state.clone(),
        }
    }

    fn period(&self, device: &Device) -> BillingPeriod {
        BillingPeriod::for_device(device, self.prorate)
    }

    fn pooled_overage(&self, usage: Decimal, members: usize) -> Decimal {
        let allowance = self.plan.included_allowance * Decimal::from(members as u64);
        CostModel::overage_cost(&self.plan, usage, allowance)
    }
}

/// Order pools by effectiveness; unusable pools last by monthly cost, ties by plan id
fn compare_effectiveness(a: &RatePool, b: &RatePool) -> Ordering {
    match (a.effectiveness(), b.effectiveness()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.plan.monthly_cost.cmp(&b.plan.monthly_cost),
    }
    .then_with(|| a.plan.id.cmp(&b.plan.id))
}

/// An ordered set of pools evaluated together in a pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RatePoolCollection {
    pools: Vec<RatePool>,
}

impl RatePoolCollection {
    /// Build the instance-wide collection from the full catalog, ranked by effectiveness
    pub fn build(
        plans: &[RatePlan],
        devices: &[Device],
        settings: &OptimizationSettings,
    ) -> Result<Self> {
        if plans.is_empty() {
            return Err(OptimizerError::EmptyRatePoolCollection);
        }

        let threshold = capacity_threshold(devices, settings.capacity_headroom);
        let mut pools: Vec<RatePool> = plans
            .iter()
            .cloned()
            .map(|plan| RatePool::new(plan, threshold, settings.prorate))
            .collect();
        pools.sort_by(compare_effectiveness);

        Ok(Self { pools })
    }

    pub fn from_pools(pools: Vec<RatePool>) -> Self {
        Self { pools }
    }

    pub fn pools(&self) -> &[RatePool] {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut [RatePool] {
        &mut self.pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn get(&self, plan_id: &str) -> Option<&RatePool> {
        self.pools.iter().find(|p| p.plan_id() == plan_id)
    }

    /// Plan ids in collection order
    pub fn plan_ids(&self) -> Vec<String> {
        self.pools.iter().map(|p| p.plan_id().to_string()).collect()
    }

    /// Fresh (empty) pools for the given plans, in the given order
    pub fn for_sequence(&self, plan_ids: &[String]) -> Result<Self> {
        let pools = plan_ids
            .iter()
            .map(|id| {
                self.get(id)
                    .map(|pool| {
                        let mut pool = pool.clone();
                        pool.reset();
                        pool
                    })
                    .ok_or_else(|| OptimizerError::UnknownPlan(id.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pools })
    }

    pub fn total_cost(&self) -> Decimal {
        self.pools.iter().map(|p| p.total_cost()).sum()
    }

    pub fn snapshot(&self) -> Vec<PoolSnapshot> {
        self.pools.iter().map(|p| p.snapshot()).collect()
    }

    /// Reinstate pool contents captured by [`RatePoolCollection::snapshot`]
    pub fn restore(&mut self, snapshots: &[PoolSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            let pool = self
                .pools
                .iter_mut()
                .find(|p| p.plan.id == snapshot.plan_id)
                .ok_or_else(|| OptimizerError::UnknownPlan(snapshot.plan_id.clone()))?;
            pool.state = snapshot.state.clone();
        }
        Ok(())
    }
}

/// Average projected usage scaled by `headroom`
pub fn capacity_threshold(devices: &[Device], headroom: Decimal) -> Decimal {
    if devices.is_empty() {
        return Decimal::ZERO;
    }
    let total: Decimal = devices.iter().map(|d| d.projected_usage).sum();
    total / Decimal::from(devices.len() as u64) * headroom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DAYS_PER_BILLING_CYCLE;
    use rust_decimal_macros::dec;

    fn plan(id: &str, cost: Decimal, allowance: Decimal, pooled: bool) -> RatePlan {
        RatePlan {
            id: id.to_string(),
            monthly_cost: cost,
            included_allowance: allowance,
            overage_unit_size: dec!(50),
            overage_unit_price: dec!(5),
            plan_type: "data".to_string(),
            pooling_eligible: pooled,
        }
    }

    fn device(id: &str, usage: Decimal) -> Device {
        Device {
            id: id.to_string(),
            projected_usage: usage,
            current_plan_id: None,
            grouping_key: None,
            billing_days: DAYS_PER_BILLING_CYCLE,
        }
    }

    #[test]
    fn test_capacity_threshold_is_average_times_headroom() {
        let devices = vec![device("a", dec!(100)), device("b", dec!(300))];
        assert_eq!(capacity_threshold(&devices, dec!(1.5)), dec!(300));
        assert_eq!(capacity_threshold(&[], dec!(1.5)), Decimal::ZERO);
    }

    #[test]
    fn test_collection_is_ranked_by_effectiveness() {
        let devices = vec![device("a", dec!(100))];
        // threshold = 150
        let plans = vec![
            plan("big", dec!(25), dec!(400), false),  // 25 / 150
            plan("small", dec!(10), dec!(100), false), // 10 / 100
            plan("empty", dec!(1), dec!(0), false),    // unusable
        ];
        let collection =
            RatePoolCollection::build(&plans, &devices, &OptimizationSettings::default()).unwrap();
        assert_eq!(collection.plan_ids(), vec!["small", "big", "empty"]);
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        let result = RatePoolCollection::build(&[], &[], &OptimizationSettings::default());
        assert!(matches!(result, Err(OptimizerError::EmptyRatePoolCollection)));
    }

    #[test]
    fn test_pooled_devices_share_allowance() {
        let model = CostModel::new();
        let mut pool = RatePool::new(plan("shared", dec!(10), dec!(100), true), dec!(1000), false);
        let heavy = device("heavy", dec!(150));
        let light = device("light", dec!(20));

        let first = pool.assign(&[&heavy], &model);
        assert_eq!(first.marginal, dec!(15));

        // The light device's unused allowance absorbs the heavy device's overage
        let second = pool.quote(&[&light], &model);
        assert_eq!(second.marginal, dec!(5));
        pool.commit(&[&light], &second);
        assert_eq!(pool.total_cost(), dec!(20));
        assert_eq!(pool.members(), &["heavy".to_string(), "light".to_string()]);
    }

    #[test]
    fn test_standalone_pool_sums_device_costs() {
        let model = CostModel::new();
        let mut pool = RatePool::new(plan("solo", dec!(10), dec!(100), false), dec!(1000), false);
        let quote = pool.assign(&[&device("a", dec!(150)), &device("b", dec!(20))], &model);
        assert_eq!(quote.device_costs, vec![dec!(15), dec!(10)]);
        assert_eq!(pool.total_cost(), dec!(25));
    }

    #[test]
    fn test_snapshot_round_trip_restores_costs() {
        let model = CostModel::new();
        let devices = vec![device("a", dec!(150))];
        let plans = vec![plan("shared", dec!(10), dec!(100), true)];
        let catalog =
            RatePoolCollection::build(&plans, &devices, &OptimizationSettings::default()).unwrap();
        let mut working = catalog.for_sequence(&["shared".to_string()]).unwrap();
        working.pools_mut()[0].assign(&[&devices[0]], &model);

        let mut restored = catalog.for_sequence(&["shared".to_string()]).unwrap();
        restored.restore(&working.snapshot()).unwrap();
        assert_eq!(restored, working);
        assert_eq!(restored.total_cost(), dec!(15));
    }

    #[test]
    fn test_unknown_plan_in_sequence() {
        let catalog = RatePoolCollection::build(
            &[plan("a", dec!(10), dec!(100), false)],
            &[],
            &OptimizationSettings::default(),
        )
        .unwrap();
        assert!(matches!(
            catalog.for_sequence(&["missing".to_string()]),
            Err(OptimizerError::UnknownPlan(_))
        ));
    }
}
