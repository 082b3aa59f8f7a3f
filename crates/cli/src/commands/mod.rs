//! Subcommand implementations

pub mod optimize;
pub mod sequences;
pub mod status;
pub mod validate;

use anyhow::{Context, Result};
use optimizer_lib::OptimizationRequest;
use std::path::Path;

/// Read an optimization request from a JSON file
pub fn load_request(path: &Path) -> Result<OptimizationRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request file {}", path.display()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub const REQUEST: &str = r#"{
        "instance_id": "fleet-2024-06",
        "devices": [
            {"id": "sim-1", "projected_usage": "40", "current_plan_id": "large"},
            {"id": "sim-2", "projected_usage": "180", "current_plan_id": "large"},
            {"id": "sim-3", "projected_usage": "90", "current_plan_id": "small"}
        ],
        "plans": [
            {"id": "small", "monthly_cost": "10", "included_allowance": "100",
             "overage_unit_size": "50", "overage_unit_price": "5", "plan_type": "data"},
            {"id": "large", "monthly_cost": "25", "included_allowance": "400",
             "overage_unit_size": "50", "overage_unit_price": "5", "plan_type": "data"}
        ],
        "settings": {"sequences_per_unit": 1}
    }"#;

    /// Write `content` to a request file inside a fresh temp dir
    pub fn request_file(content: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }
}
