//! Per-instance optimization settings

use crate::sequence::{SequenceMode, DEFAULT_SEQUENCE_CAP};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn default_sequence_cap() -> usize {
    DEFAULT_SEQUENCE_CAP
}

fn default_sequences_per_unit() -> usize {
    25
}

fn default_capacity_headroom() -> Decimal {
    Decimal::new(15, 1)
}

fn default_allow_grouping() -> bool {
    true
}

/// Knobs that shape how an instance is searched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSettings {
    #[serde(default)]
    pub sequence_mode: SequenceMode,
    /// Upper bound on generated sequences
    #[serde(default = "default_sequence_cap")]
    pub sequence_cap: usize,
    #[serde(default = "default_sequences_per_unit")]
    pub sequences_per_unit: usize,
    /// Prorate monthly cost by each device's billable days
    #[serde(default)]
    pub prorate: bool,
    /// Multiplier over average usage used to derive pool capacity thresholds
    #[serde(default = "default_capacity_headroom")]
    pub capacity_headroom: Decimal,
    /// Whether grouped strategies may run when devices carry grouping keys
    #[serde(default = "default_allow_grouping")]
    pub allow_grouping: bool,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            sequence_mode: SequenceMode::default(),
            sequence_cap: default_sequence_cap(),
            sequences_per_unit: default_sequences_per_unit(),
            prorate: false,
            capacity_headroom: default_capacity_headroom(),
            allow_grouping: default_allow_grouping(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings: OptimizationSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, OptimizationSettings::default());
        assert_eq!(settings.sequence_cap, 1_000);
        assert_eq!(settings.capacity_headroom, Decimal::new(15, 1));
    }
}
