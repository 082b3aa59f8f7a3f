//! `rpo validate`

use anyhow::Result;
use optimizer_lib::{cost::validate_request, OptimizerError};
use serde::Serialize;
use std::path::Path;

use super::load_request;
use crate::output::{print_error, print_json, print_success, print_warning, OutputFormat};

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub instance_id: String,
    pub devices: usize,
    pub plans: usize,
    pub valid: bool,
    pub problems: Vec<String>,
}

pub fn check(path: &Path) -> Result<ValidationReport> {
    let request = load_request(path)?;
    let problems = match validate_request(&request) {
        Ok(()) => Vec::new(),
        Err(OptimizerError::InvalidCatalog { reasons }) => reasons,
        Err(e) => vec![e.to_string()],
    };
    Ok(ValidationReport {
        instance_id: request.instance_id,
        devices: request.devices.len(),
        plans: request.plans.len(),
        valid: problems.is_empty(),
        problems,
    })
}

pub fn validate(path: &Path, format: OutputFormat) -> Result<()> {
    let report = check(path)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if report.valid {
                print_success(&format!(
                    "{}: {} devices, {} plans, ready to optimize",
                    report.instance_id, report.devices, report.plans
                ));
            } else {
                print_warning(&format!("{} cannot be optimized:", report.instance_id));
                for problem in &report.problems {
                    print_error(problem);
                }
            }
        }
    }

    if !report.valid {
        anyhow::bail!("{} problem(s) found", report.problems.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{request_file, REQUEST};

    #[test]
    fn test_valid_request() {
        let (_dir, path) = request_file(REQUEST);
        let report = check(&path).unwrap();
        assert!(report.valid);
        assert_eq!(report.devices, 3);
        assert_eq!(report.plans, 2);
    }

    #[test]
    fn test_every_catalog_problem_is_listed() {
        let broken = REQUEST
            .replace(r#""overage_unit_price": "5", "plan_type": "data"},"#, r#""overage_unit_price": "0", "plan_type": "data"},"#)
            .replace(r#""id": "large""#, r#""id": "small""#);
        let (_dir, path) = request_file(&broken);

        let report = check(&path).unwrap();
        assert!(!report.valid);
        assert_eq!(report.problems.len(), 2);
        assert!(report.problems.iter().any(|p| p.contains("duplicate id")));
        assert!(report.problems.iter().any(|p| p.contains("overage unit price")));
    }

    #[test]
    fn test_empty_devices_reported() {
        let (_dir, path) = request_file(
            r#"{"instance_id": "empty", "devices": [], "plans": [
                {"id": "small", "monthly_cost": "10", "included_allowance": "100",
                 "overage_unit_size": "50", "overage_unit_price": "5"}
            ]}"#,
        );
        let report = check(&path).unwrap();
        assert!(!report.valid);
        assert!(report.problems[0].contains("no devices"));
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let (_dir, path) = request_file("{ not json");
        assert!(check(&path).is_err());
    }
}
