//! Startup request files

use anyhow::{Context, Result};
use optimizer_lib::{OptimizationRequest, OptimizationSettings};
use serde_json::Value;
use std::path::Path;

/// Parse a request, filling in `defaults` when it carries no `settings`
pub fn parse_request(raw: &str, defaults: &OptimizationSettings) -> Result<OptimizationRequest> {
    let mut value: Value = serde_json::from_str(raw).context("request is not valid JSON")?;
    if let Value::Object(fields) = &mut value {
        if !fields.contains_key("settings") {
            fields.insert("settings".to_string(), serde_json::to_value(defaults)?);
        }
    }
    serde_json::from_value(value).context("request does not match the expected shape")
}

pub async fn load_request(path: &Path, defaults: &OptimizationSettings) -> Result<OptimizationRequest> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    parse_request(&raw, defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"{
        "instance_id": "fleet-2024-06",
        "devices": [{"id": "sim-1", "projected_usage": "120"}],
        "plans": [{
            "id": "basic",
            "monthly_cost": "10",
            "included_allowance": "100",
            "overage_unit_size": "50",
            "overage_unit_price": "5",
            "plan_type": "data"
        }]
    }"#;

    #[test]
    fn test_missing_settings_take_configured_defaults() {
        let defaults = OptimizationSettings {
            sequences_per_unit: 7,
            prorate: true,
            ..OptimizationSettings::default()
        };
        let request = parse_request(REQUEST, &defaults).unwrap();
        assert_eq!(request.instance_id, "fleet-2024-06");
        assert_eq!(request.settings, defaults);
    }

    #[test]
    fn test_explicit_settings_win() {
        let with_settings = REQUEST.replacen(
            "\"instance_id\"",
            "\"settings\": {\"sequences_per_unit\": 3}, \"instance_id\"",
            1,
        );
        let defaults = OptimizationSettings {
            sequences_per_unit: 7,
            ..OptimizationSettings::default()
        };
        let request = parse_request(&with_settings, &defaults).unwrap();
        assert_eq!(request.settings.sequences_per_unit, 3);
    }

    #[test]
    fn test_malformed_request_is_an_error() {
        let defaults = OptimizationSettings::default();
        assert!(parse_request("{\"instance_id\": 5}", &defaults).is_err());
        assert!(parse_request("not json", &defaults).is_err());
    }
}
