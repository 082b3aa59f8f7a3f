//! Cost model for pricing devices on rate plans
//!
//! Cost of a device on a plan is the (optionally prorated) monthly cost,
//! plus stepped overage above the included allowance, plus any configured
//! surcharges. Overage is charged per started unit: usage one unit above
//! the allowance costs exactly one unit price, usage equal to the allowance
//! costs nothing.

mod validation;

pub use validation::{validate_catalog, validate_request};

use crate::models::{Device, RatePlan, DAYS_PER_BILLING_CYCLE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Decimal places kept on individual surcharge amounts
const SURCHARGE_PRECISION: u32 = 4;

/// Billing window used to prorate the fixed monthly cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub days: u32,
    pub prorate: bool,
}

impl BillingPeriod {
    pub fn full_cycle() -> Self {
        Self {
            days: DAYS_PER_BILLING_CYCLE,
            prorate: false,
        }
    }

    pub fn for_device(device: &Device, prorate: bool) -> Self {
        Self {
            days: device.billing_days,
            prorate,
        }
    }

    /// Fraction of the monthly cost billed for this period. Periods longer
    /// than a cycle bill more than the monthly cost.
    pub fn factor(&self) -> Decimal {
        if !self.prorate || self.days == DAYS_PER_BILLING_CYCLE {
            Decimal::ONE
        } else {
            Decimal::from(self.days) / Decimal::from(DAYS_PER_BILLING_CYCLE)
        }
    }
}

/// Additional per-device charge (taxes, regulatory fees) layered on the base cost
pub trait Surcharge: Send + Sync {
    fn name(&self) -> &str;

    /// Amount charged for `device` on `plan`, given the already prorated base cost
    fn amount(&self, device: &Device, plan: &RatePlan, base_cost: Decimal) -> Decimal;
}

/// Surcharge charged as a percentage of the base cost
#[derive(Debug, Clone)]
pub struct PercentageSurcharge {
    name: String,
    rate: Decimal,
}

impl PercentageSurcharge {
    /// `rate` is a fraction, e.g. 0.05 for five percent
    pub fn new(name: impl Into<String>, rate: Decimal) -> Self {
        Self {
            name: name.into(),
            rate,
        }
    }
}

impl Surcharge for PercentageSurcharge {
    fn name(&self) -> &str {
        &self.name
    }

    fn amount(&self, _device: &Device, _plan: &RatePlan, base_cost: Decimal) -> Decimal {
        base_cost * self.rate
    }
}

/// Flat fee charged per device regardless of plan
#[derive(Debug, Clone)]
pub struct FlatSurcharge {
    name: String,
    fee: Decimal,
}

impl FlatSurcharge {
    pub fn new(name: impl Into<String>, fee: Decimal) -> Self {
        Self {
            name: name.into(),
            fee,
        }
    }
}

impl Surcharge for FlatSurcharge {
    fn name(&self) -> &str {
        &self.name
    }

    fn amount(&self, _device: &Device, _plan: &RatePlan, _base_cost: Decimal) -> Decimal {
        self.fee
    }
}

/// Itemized cost of a device on a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub base: Decimal,
    pub overage: Decimal,
    pub surcharges: Decimal,
}

impl CostBreakdown {
    pub fn total(&self) -> Decimal {
        self.base + self.overage + self.surcharges
    }

    /// Cost that does not depend on usage
    pub fn fixed(&self) -> Decimal {
        self.base + self.surcharges
    }
}

/// Prices devices on plans
#[derive(Clone, Default)]
pub struct CostModel {
    surcharges: Vec<Arc<dyn Surcharge>>,
}

impl fmt::Debug for CostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.surcharges.iter().map(|s| s.name()).collect();
        f.debug_struct("CostModel")
            .field("surcharges", &names)
            .finish()
    }
}

impl CostModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_surcharge(mut self, surcharge: Arc<dyn Surcharge>) -> Self {
        self.surcharges.push(surcharge);
        self
    }

    /// Number of overage units billed for `usage` against `allowance`
    pub fn overage_units(usage: Decimal, allowance: Decimal, unit_size: Decimal) -> Decimal {
        if usage <= allowance || unit_size <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((usage - allowance) / unit_size).ceil()
    }

    /// Overage charge for `usage` against `allowance` at the plan's overage rate
    pub fn overage_cost(plan: &RatePlan, usage: Decimal, allowance: Decimal) -> Decimal {
        Self::overage_units(usage, allowance, plan.overage_unit_size) * plan.overage_unit_price
    }

    /// Monthly cost of the plan scaled to the billing period, rounded to cents when prorated
    pub fn base_cost(plan: &RatePlan, period: BillingPeriod) -> Decimal {
        let factor = period.factor();
        if factor == Decimal::ONE {
            plan.monthly_cost
        } else {
            (plan.monthly_cost * factor).round_dp(2)
        }
    }

    /// Usage-independent cost of a device on a plan: base plus surcharges
    pub fn fixed_cost(&self, device: &Device, plan: &RatePlan, period: BillingPeriod) -> Decimal {
        let base = Self::base_cost(plan, period);
        base + self.surcharge_total(device, plan, base)
    }

    /// Full itemized cost of a device billed alone on a plan
    pub fn breakdown(&self, device: &Device, plan: &RatePlan, period: BillingPeriod) -> CostBreakdown {
        let base = Self::base_cost(plan, period);
        CostBreakdown {
            base,
            overage: Self::overage_cost(plan, device.projected_usage, plan.included_allowance),
            surcharges: self.surcharge_total(device, plan, base),
        }
    }

    pub fn cost(&self, device: &Device, plan: &RatePlan, period: BillingPeriod) -> Decimal {
        self.breakdown(device, plan, period).total()
    }

    fn surcharge_total(&self, device: &Device, plan: &RatePlan, base: Decimal) -> Decimal {
        self.surcharges
            .iter()
            .map(|s| s.amount(device, plan, base).round_dp(SURCHARGE_PRECISION))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan_a() -> RatePlan {
        RatePlan {
            id: "plan-a".to_string(),
            monthly_cost: dec!(10),
            included_allowance: dec!(100),
            overage_unit_size: dec!(50),
            overage_unit_price: dec!(5),
            plan_type: "data".to_string(),
            pooling_eligible: false,
        }
    }

    fn device(usage: Decimal) -> Device {
        Device {
            id: "sim-1".to_string(),
            projected_usage: usage,
            current_plan_id: None,
            grouping_key: None,
            billing_days: DAYS_PER_BILLING_CYCLE,
        }
    }

    #[test]
    fn test_usage_at_allowance_has_no_overage() {
        let model = CostModel::new();
        let breakdown = model.breakdown(&device(dec!(100)), &plan_a(), BillingPeriod::full_cycle());
        assert_eq!(breakdown.overage, Decimal::ZERO);
        assert_eq!(breakdown.total(), dec!(10));
    }

    #[test]
    fn test_one_unit_over_costs_one_unit_price() {
        let model = CostModel::new();
        let cost = model.cost(&device(dec!(150)), &plan_a(), BillingPeriod::full_cycle());
        assert_eq!(cost, dec!(15));
    }

    #[test]
    fn test_partial_unit_rounds_up() {
        let model = CostModel::new();
        let cost = model.cost(&device(dec!(100.01)), &plan_a(), BillingPeriod::full_cycle());
        assert_eq!(cost, dec!(15));
        let cost = model.cost(&device(dec!(300)), &plan_a(), BillingPeriod::full_cycle());
        assert_eq!(cost, dec!(30));
    }

    #[test]
    fn test_proration_scales_base_only() {
        let model = CostModel::new();
        let mut d = device(dec!(150));
        d.billing_days = 15;
        let period = BillingPeriod::for_device(&d, true);
        let breakdown = model.breakdown(&d, &plan_a(), period);
        assert_eq!(breakdown.base, dec!(5));
        assert_eq!(breakdown.overage, dec!(5));

        let unprorated = model.breakdown(&d, &plan_a(), BillingPeriod::for_device(&d, false));
        assert_eq!(unprorated.base, dec!(10));
    }

    #[test]
    fn test_long_period_is_prorated_up() {
        let mut d = device(dec!(50));
        d.billing_days = 31;
        let period = BillingPeriod::for_device(&d, true);
        assert!(period.factor() > Decimal::ONE);
        assert_eq!(CostModel::base_cost(&plan_a(), period), dec!(10.33));

        d.billing_days = 60;
        let period = BillingPeriod::for_device(&d, true);
        assert_eq!(CostModel::base_cost(&plan_a(), period), dec!(20));
    }

    #[test]
    fn test_surcharges_apply_to_base() {
        let model = CostModel::new()
            .with_surcharge(Arc::new(PercentageSurcharge::new("tax", dec!(0.1))))
            .with_surcharge(Arc::new(FlatSurcharge::new("regulatory", dec!(0.5))));
        let breakdown = model.breakdown(&device(dec!(150)), &plan_a(), BillingPeriod::full_cycle());
        assert_eq!(breakdown.surcharges, dec!(1.5));
        assert_eq!(breakdown.total(), dec!(16.5));
        assert!(format!("{:?}", model).contains("regulatory"));
    }
}
