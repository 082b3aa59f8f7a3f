//! Assignment strategies: how devices are partitioned and in what order

use crate::models::Device;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// Every device is its own partition
    None,
    /// Devices sharing a grouping key move together
    GroupByPlanKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOrdering {
    LargestFirst,
    SmallestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Strategy {
    pub grouping: Grouping,
    pub ordering: UsageOrdering,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grouping = match self.grouping {
            Grouping::None => "ungrouped",
            Grouping::GroupByPlanKey => "grouped",
        };
        let ordering = match self.ordering {
            UsageOrdering::LargestFirst => "largest-first",
            UsageOrdering::SmallestFirst => "smallest-first",
        };
        write!(f, "{}/{}", grouping, ordering)
    }
}

/// Devices assigned to one pool as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub key: String,
    /// Indices into the instance's device list, in input order
    pub members: Vec<usize>,
    pub total_usage: Decimal,
}

impl Strategy {
    /// Every strategy, simplest first
    pub const ALL: [Strategy; 4] = [
        Strategy::new(Grouping::None, UsageOrdering::LargestFirst),
        Strategy::new(Grouping::None, UsageOrdering::SmallestFirst),
        Strategy::new(Grouping::GroupByPlanKey, UsageOrdering::LargestFirst),
        Strategy::new(Grouping::GroupByPlanKey, UsageOrdering::SmallestFirst),
    ];

    pub const fn new(grouping: Grouping, ordering: UsageOrdering) -> Self {
        Self { grouping, ordering }
    }

    /// Split devices into partitions and order them by total usage.
    /// Equal usage keeps the partition key order, so the result does not
    /// depend on the device input order.
    pub fn partition(&self, devices: &[Device]) -> Vec<Partition> {
        let mut partitions = match self.grouping {
            Grouping::None => devices
                .iter()
                .enumerate()
                .map(|(i, d)| Partition {
                    key: d.id.clone(),
                    members: vec![i],
                    total_usage: d.projected_usage,
                })
                .collect::<Vec<_>>(),
            Grouping::GroupByPlanKey => {
                let mut grouped: BTreeMap<String, Vec<usize>> = BTreeMap::new();
                for (i, d) in devices.iter().enumerate() {
                    // Ungrouped devices form singleton partitions keyed by device id
                    let key = match &d.grouping_key {
                        Some(key) => format!("group:{}", key),
                        None => format!("device:{}", d.id),
                    };
                    grouped.entry(key).or_default().push(i);
                }
                grouped
                    .into_iter()
                    .map(|(key, members)| Partition {
                        total_usage: members.iter().map(|&i| devices[i].projected_usage).sum(),
                        key,
                        members,
                    })
                    .collect()
            }
        };

        partitions.sort_by(|a, b| {
            let by_usage = match self.ordering {
                UsageOrdering::LargestFirst => b.total_usage.cmp(&a.total_usage),
                UsageOrdering::SmallestFirst => a.total_usage.cmp(&b.total_usage),
            };
            by_usage.then_with(|| a.key.cmp(&b.key))
        });
        partitions
    }
}

/// Strategies worth running for these devices; grouped strategies are
/// dropped when grouping is disabled or no device carries a grouping key
pub fn strategies_for(devices: &[Device], allow_grouping: bool) -> Vec<Strategy> {
    let any_grouped = devices.iter().any(|d| d.grouping_key.is_some());
    Strategy::ALL
        .iter()
        .copied()
        .filter(|s| s.grouping == Grouping::None || (allow_grouping && any_grouped))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DAYS_PER_BILLING_CYCLE;
    use rust_decimal_macros::dec;

    fn device(id: &str, usage: Decimal, key: Option<&str>) -> Device {
        Device {
            id: id.to_string(),
            projected_usage: usage,
            current_plan_id: None,
            grouping_key: key.map(str::to_string),
            billing_days: DAYS_PER_BILLING_CYCLE,
        }
    }

    #[test]
    fn test_ungrouped_largest_first() {
        let devices = vec![
            device("a", dec!(50), None),
            device("b", dec!(300), None),
            device("c", dec!(150), None),
        ];
        let strategy = Strategy::new(Grouping::None, UsageOrdering::LargestFirst);
        let keys: Vec<String> = strategy.partition(&devices).into_iter().map(|p| p.key).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ties_break_on_key_regardless_of_input_order() {
        let forward = vec![device("x", dec!(10), None), device("y", dec!(10), None)];
        let reversed = vec![device("y", dec!(10), None), device("x", dec!(10), None)];
        let strategy = Strategy::new(Grouping::None, UsageOrdering::SmallestFirst);
        let keys = |devices: &[Device]| -> Vec<String> {
            strategy.partition(devices).into_iter().map(|p| p.key).collect()
        };
        assert_eq!(keys(&forward), keys(&reversed));
    }

    #[test]
    fn test_grouped_partitions_sum_usage() {
        let devices = vec![
            device("a", dec!(50), Some("fleet")),
            device("b", dec!(300), None),
            device("c", dec!(150), Some("fleet")),
        ];
        let strategy = Strategy::new(Grouping::GroupByPlanKey, UsageOrdering::SmallestFirst);
        let partitions = strategy.partition(&devices);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].key, "group:fleet");
        assert_eq!(partitions[0].members, vec![0, 2]);
        assert_eq!(partitions[0].total_usage, dec!(200));
        assert_eq!(partitions[1].key, "device:b");
    }

    #[test]
    fn test_grouped_strategies_pruned_without_keys() {
        let plain = vec![device("a", dec!(1), None)];
        assert_eq!(strategies_for(&plain, true).len(), 2);

        let keyed = vec![device("a", dec!(1), Some("k"))];
        assert_eq!(strategies_for(&keyed, true).len(), 4);
        assert_eq!(strategies_for(&keyed, false).len(), 2);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::ALL[0].to_string(), "ungrouped/largest-first");
        assert_eq!(Strategy::ALL[3].to_string(), "grouped/smallest-first");
    }
}
