//! Catalog validation run before any sequence is generated

use crate::error::{OptimizerError, Result};
use crate::models::{Device, OptimizationRequest, RatePlan};
use rust_decimal::Decimal;
use std::collections::HashSet;

/// Reject catalogs that cannot be priced. All problems are reported at once.
pub fn validate_catalog(plans: &[RatePlan]) -> Result<()> {
    let mut reasons = Vec::new();
    let mut seen = HashSet::new();

    for plan in plans {
        if plan.id.trim().is_empty() {
            reasons.push("plan with empty id".to_string());
        } else if !seen.insert(plan.id.as_str()) {
            reasons.push(format!("plan {}: duplicate id", plan.id));
        }
        if plan.overage_unit_size <= Decimal::ZERO {
            reasons.push(format!(
                "plan {}: overage unit size must be positive (got {})",
                plan.id, plan.overage_unit_size
            ));
        }
        if plan.overage_unit_price <= Decimal::ZERO {
            reasons.push(format!(
                "plan {}: overage unit price must be positive (got {})",
                plan.id, plan.overage_unit_price
            ));
        }
        if plan.monthly_cost < Decimal::ZERO {
            reasons.push(format!("plan {}: negative monthly cost", plan.id));
        }
        if plan.included_allowance < Decimal::ZERO {
            reasons.push(format!("plan {}: negative included allowance", plan.id));
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(OptimizerError::InvalidCatalog { reasons })
    }
}

/// Full request validation: empty input first, then the catalog
pub fn validate_request(request: &OptimizationRequest) -> Result<()> {
    if request.plans.is_empty() {
        return Err(OptimizerError::EmptyInput("no rate plans supplied".to_string()));
    }
    validate_catalog(&request.plans)?;
    if request.devices.is_empty() {
        return Err(OptimizerError::EmptyInput("no devices supplied".to_string()));
    }
    validate_devices(&request.devices)
}

/// Every device must be assignable exactly once
fn validate_devices(devices: &[Device]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut reasons = Vec::new();
    for device in devices {
        if !seen.insert(device.id.as_str()) {
            reasons.push(format!("device {}: duplicate id", device.id));
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(OptimizerError::InvalidCatalog { reasons })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(id: &str, size: Decimal, price: Decimal) -> RatePlan {
        RatePlan {
            id: id.to_string(),
            monthly_cost: dec!(10),
            included_allowance: dec!(100),
            overage_unit_size: size,
            overage_unit_price: price,
            plan_type: "data".to_string(),
            pooling_eligible: false,
        }
    }

    #[test]
    fn test_valid_catalog_passes() {
        let plans = vec![plan("a", dec!(50), dec!(5)), plan("b", dec!(1), dec!(0.01))];
        assert!(validate_catalog(&plans).is_ok());
    }

    #[test]
    fn test_zero_price_and_size_are_rejected_together() {
        let plans = vec![plan("a", dec!(0), dec!(5)), plan("b", dec!(50), dec!(0))];
        match validate_catalog(&plans) {
            Err(OptimizerError::InvalidCatalog { reasons }) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].contains("plan a"));
                assert!(reasons[1].contains("plan b"));
            }
            other => panic!("expected invalid catalog, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let plans = vec![plan("a", dec!(50), dec!(5)), plan("a", dec!(50), dec!(5))];
        assert!(matches!(
            validate_catalog(&plans),
            Err(OptimizerError::InvalidCatalog { .. })
        ));
    }

    #[test]
    fn test_empty_request_reports_empty_input() {
        let request = OptimizationRequest {
            instance_id: "inst".to_string(),
            devices: vec![],
            plans: vec![plan("a", dec!(50), dec!(5))],
            settings: Default::default(),
        };
        assert!(matches!(
            validate_request(&request),
            Err(OptimizerError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_duplicate_device_ids_are_rejected() {
        let device = |id: &str| Device {
            id: id.to_string(),
            projected_usage: dec!(10),
            current_plan_id: None,
            grouping_key: None,
            billing_days: crate::models::DAYS_PER_BILLING_CYCLE,
        };
        let request = OptimizationRequest {
            instance_id: "inst".to_string(),
            devices: vec![device("sim-1"), device("sim-2"), device("sim-1")],
            plans: vec![plan("a", dec!(50), dec!(5))],
            settings: Default::default(),
        };
        match validate_request(&request) {
            Err(OptimizerError::InvalidCatalog { reasons }) => {
                assert_eq!(reasons, vec!["device sim-1: duplicate id".to_string()]);
            }
            other => panic!("expected duplicate device rejection, got {:?}", other),
        }
    }
}
