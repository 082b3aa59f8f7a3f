//! Rate pool sequence generation
//!
//! A sequence is an ordered subset of the catalog's plans that the engine
//! evaluates as one candidate pool collection. Plans inside a sequence keep
//! the collection's effectiveness ranking, so the order only decides ties;
//! what varies between sequences is which plans are on offer.
//!
//! Two modes are supported:
//! - `Flat`: subsets of the whole ranked catalog, largest first.
//! - `ByPlanType`: subsets are taken per plan type and then combined,
//!   best-ranked combinations first.
//!
//! Generation is lazy and stops at the configured cap.

mod combinations;

pub use combinations::{descending_subsets, tuples_with_sum, Combinations};

use crate::models::UnitOfWork;
use crate::pool::RatePoolCollection;
use crate::settings::OptimizationSettings;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum number of sequences generated for an instance by default
pub const DEFAULT_SEQUENCE_CAP: usize = 1_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceMode {
    #[default]
    Flat,
    ByPlanType,
}

/// One candidate ordering of rate plans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// Position in generation order
    pub index: usize,
    pub plan_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceGenerator {
    mode: SequenceMode,
    cap: usize,
}

impl SequenceGenerator {
    pub fn new(mode: SequenceMode, cap: usize) -> Self {
        Self { mode, cap }
    }

    pub fn from_settings(settings: &OptimizationSettings) -> Self {
        Self::new(settings.sequence_mode, settings.sequence_cap)
    }

    pub fn mode(&self) -> SequenceMode {
        self.mode
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Generate at most `cap` sequences over the collection's plans
    pub fn generate(&self, collection: &RatePoolCollection) -> Vec<Sequence> {
        let ranked = collection.plan_ids();
        let orderings = match self.mode {
            SequenceMode::Flat => self.flat(&ranked),
            SequenceMode::ByPlanType => self.by_plan_type(collection, &ranked),
        };

        debug!(
            mode = ?self.mode,
            plans = ranked.len(),
            sequences = orderings.len(),
            cap = self.cap,
            "Generated rate pool sequences"
        );

        orderings
            .into_iter()
            .enumerate()
            .map(|(index, plan_ids)| Sequence { index, plan_ids })
            .collect()
    }

    fn flat(&self, ranked: &[String]) -> Vec<Vec<String>> {
        descending_subsets(ranked.len())
            .take(self.cap)
            .map(|subset| subset.into_iter().map(|i| ranked[i].clone()).collect())
            .collect()
    }

    fn by_plan_type(&self, collection: &RatePoolCollection, ranked: &[String]) -> Vec<Vec<String>> {
        if self.cap == 0 || ranked.is_empty() {
            return Vec::new();
        }

        // Groups ordered by their best-ranked plan; members keep rank order
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (rank, pool) in collection.pools().iter().enumerate() {
            let plan_type = &pool.plan().plan_type;
            match groups.iter_mut().find(|(t, _)| t == plan_type) {
                Some((_, members)) => members.push(rank),
                None => groups.push((plan_type.clone(), vec![rank])),
            }
        }

        let per_group: Vec<Vec<Vec<usize>>> = groups
            .iter()
            .map(|(_, members)| {
                descending_subsets(members.len())
                    .take(self.cap)
                    .map(|subset| subset.into_iter().map(|i| members[i]).collect())
                    .collect()
            })
            .collect();
        let lens: Vec<usize> = per_group.iter().map(Vec::len).collect();
        let max_sum: usize = lens.iter().map(|l| l - 1).sum();

        let mut tuples = Vec::new();
        for target in 0..=max_sum {
            if tuples.len() >= self.cap {
                break;
            }
            tuples_with_sum(&lens, target, self.cap, &mut tuples);
        }

        tuples
            .into_iter()
            .map(|tuple| {
                let mut ranks: Vec<usize> = tuple
                    .iter()
                    .enumerate()
                    .flat_map(|(group, &choice)| per_group[group][choice].iter().copied())
                    .collect();
                ranks.sort_unstable();
                ranks.into_iter().map(|r| ranked[r].clone()).collect()
            })
            .collect()
    }
}

/// Bind sequences to units of work, `per_unit` sequences each, in generation order
pub fn bind_units(instance_id: &str, sequences: &[Sequence], per_unit: usize) -> Vec<UnitOfWork> {
    let per_unit = per_unit.max(1);
    sequences
        .chunks(per_unit)
        .enumerate()
        .map(|(index, chunk)| UnitOfWork {
            id: unit_id(instance_id, index),
            index,
            sequence_indices: chunk.iter().map(|s| s.index).collect(),
        })
        .collect()
}

pub fn unit_id(instance_id: &str, index: usize) -> String {
    format!("{}-u{:04}", instance_id, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, RatePlan, DAYS_PER_BILLING_CYCLE};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn plan(id: &str, cost: Decimal, plan_type: &str) -> RatePlan {
        RatePlan {
            id: id.to_string(),
            monthly_cost: cost,
            included_allowance: dec!(100),
            overage_unit_size: dec!(10),
            overage_unit_price: dec!(1),
            plan_type: plan_type.to_string(),
            pooling_eligible: false,
        }
    }

    fn collection(plans: &[RatePlan]) -> RatePoolCollection {
        let devices = vec![Device {
            id: "d".to_string(),
            projected_usage: dec!(100),
            current_plan_id: None,
            grouping_key: None,
            billing_days: DAYS_PER_BILLING_CYCLE,
        }];
        RatePoolCollection::build(plans, &devices, &OptimizationSettings::default()).unwrap()
    }

    #[test]
    fn test_flat_generation_full_set_first() {
        let plans = vec![
            plan("c", dec!(3), "data"),
            plan("a", dec!(1), "data"),
            plan("b", dec!(2), "data"),
        ];
        let sequences = SequenceGenerator::new(SequenceMode::Flat, 100).generate(&collection(&plans));
        assert_eq!(sequences.len(), 7);
        assert_eq!(sequences[0].plan_ids, vec!["a", "b", "c"]);
        assert_eq!(sequences[1].plan_ids, vec!["a", "b"]);
        assert_eq!(sequences[6].plan_ids, vec!["c"]);
        assert!(sequences.iter().enumerate().all(|(i, s)| s.index == i));
    }

    #[test]
    fn test_generation_is_capped() {
        let plans: Vec<RatePlan> = (0..20)
            .map(|i| plan(&format!("p{:02}", i), Decimal::from(i + 1), "data"))
            .collect();
        let generator = SequenceGenerator::new(SequenceMode::Flat, DEFAULT_SEQUENCE_CAP);
        let sequences = generator.generate(&collection(&plans));
        assert_eq!(sequences.len(), DEFAULT_SEQUENCE_CAP);
        assert_eq!(sequences[0].plan_ids.len(), 20);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let plans = vec![
            plan("a", dec!(1), "data"),
            plan("b", dec!(2), "voice"),
            plan("c", dec!(3), "data"),
        ];
        let generator = SequenceGenerator::new(SequenceMode::ByPlanType, 50);
        let first = generator.generate(&collection(&plans));
        let second = generator.generate(&collection(&plans));
        assert_eq!(first, second);
    }

    #[test]
    fn test_by_plan_type_combines_best_groups_first() {
        let plans = vec![
            plan("a", dec!(1), "data"),
            plan("b", dec!(2), "voice"),
            plan("c", dec!(3), "data"),
        ];
        let sequences =
            SequenceGenerator::new(SequenceMode::ByPlanType, 100).generate(&collection(&plans));
        // data: {a,c},{a},{c}; voice: {b}
        assert_eq!(sequences.len(), 3);
        assert_eq!(sequences[0].plan_ids, vec!["a", "b", "c"]);
        assert_eq!(sequences[1].plan_ids, vec!["a", "b"]);
        assert_eq!(sequences[2].plan_ids, vec!["b", "c"]);
    }

    #[test]
    fn test_zero_cap_generates_nothing() {
        let plans = vec![plan("a", dec!(1), "data")];
        let coll = collection(&plans);
        assert!(SequenceGenerator::new(SequenceMode::Flat, 0).generate(&coll).is_empty());
        assert!(SequenceGenerator::new(SequenceMode::ByPlanType, 0).generate(&coll).is_empty());
    }

    #[test]
    fn test_bind_units_chunks_in_order() {
        let sequences: Vec<Sequence> = (0..5)
            .map(|index| Sequence {
                index,
                plan_ids: vec!["a".to_string()],
            })
            .collect();
        let units = bind_units("inst-1", &sequences, 2);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].id, "inst-1-u0000");
        assert_eq!(units[0].sequence_indices, vec![0, 1]);
        assert_eq!(units[2].sequence_indices, vec![4]);
        assert_eq!(units[2].index, 2);
    }
}
