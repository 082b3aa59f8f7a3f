//! Engine scenario tests
//!
//! These run full and budget-interrupted searches over small catalogs
//! and compare outcomes.

#[cfg(test)]
mod engine_tests {
    use crate::cost::CostModel;
    use crate::engine::{
        strategies_for, AssignmentEngine, BestResult, EngineProgress, ExecutionBudget, Grouping,
        RunStatus, Strategy, UsageOrdering,
    };
    use crate::error::OptimizerError;
    use crate::models::{Device, RatePlan, DAYS_PER_BILLING_CYCLE};
    use crate::pool::RatePoolCollection;
    use crate::sequence::{Sequence, SequenceGenerator, SequenceMode};
    use crate::settings::OptimizationSettings;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn plan(id: &str, cost: Decimal, allowance: Decimal, size: Decimal, price: Decimal) -> RatePlan {
        RatePlan {
            id: id.to_string(),
            monthly_cost: cost,
            included_allowance: allowance,
            overage_unit_size: size,
            overage_unit_price: price,
            plan_type: "data".to_string(),
            pooling_eligible: false,
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

    fn three_device_scenario() -> (Vec<Device>, Vec<RatePlan>) {
        let devices = vec![
            device("sim-1", dec!(50)),
            device("sim-2", dec!(150)),
            device("sim-3", dec!(300)),
        ];
        let plans = vec![
            plan("plan-a", dec!(10), dec!(100), dec!(50), dec!(5)),
            plan("plan-b", dec!(25), dec!(400), dec!(100), dec!(5)),
        ];
        (devices, plans)
    }

    fn larger_scenario() -> (Vec<Device>, Vec<RatePlan>) {
        let devices: Vec<Device> = (0..12)
            .map(|i| {
                let mut d = device(&format!("sim-{:02}", i), Decimal::from(i * 37 % 500 + 10));
                if i % 3 == 0 {
                    d.grouping_key = Some(format!("fleet-{}", i % 2));
                }
                d
            })
            .collect();
        let mut plans = vec![
            plan("small", dec!(8), dec!(100), dec!(50), dec!(4)),
            plan("medium", dec!(15), dec!(250), dec!(50), dec!(3)),
            plan("large", dec!(30), dec!(600), dec!(100), dec!(5)),
            plan("unlimited", dec!(45), dec!(5000), dec!(1000), dec!(1)),
        ];
        plans[1].pooling_eligible = true;
        (devices, plans)
    }

    /// One sequence holding every pool in ranked order
    fn whole_catalog(catalog: &RatePoolCollection) -> Sequence {
        Sequence {
            index: 0,
            plan_ids: catalog.pools().iter().map(|p| p.plan_id().to_string()).collect(),
        }
    }

    fn progress_for(devices: &[Device], catalog: &RatePoolCollection) -> EngineProgress {
        let sequences = SequenceGenerator::new(SequenceMode::Flat, 1_000).generate(catalog);
        EngineProgress::new(strategies_for(devices, true), sequences)
    }

    fn run_to_completion(devices: &[Device], plans: &[RatePlan]) -> BestResult {
        let catalog =
            RatePoolCollection::build(plans, devices, &OptimizationSettings::default()).unwrap();
        let model = CostModel::new();
        let engine = AssignmentEngine::new(devices, &catalog, &model);
        let run = engine
            .run(progress_for(devices, &catalog), &mut ExecutionBudget::unlimited())
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        run.progress.best
    }

    /// Runs with a small step budget, round-tripping the progress through
    /// JSON between invocations like a checkpoint would
    fn run_interrupted(devices: &[Device], plans: &[RatePlan], steps: u64) -> (BestResult, usize) {
        let catalog =
            RatePoolCollection::build(plans, devices, &OptimizationSettings::default()).unwrap();
        let model = CostModel::new();
        let engine = AssignmentEngine::new(devices, &catalog, &model);

        let mut progress = progress_for(devices, &catalog);
        let mut invocations = 0;
        let mut previous_best: Option<Decimal> = None;
        loop {
            invocations += 1;
            let run = engine
                .run(progress, &mut ExecutionBudget::with_step_limit(steps))
                .unwrap();

            if let (Some(prev), Some(current)) = (previous_best, run.progress.best.total_cost()) {
                assert!(current <= prev, "best cost increased across a resume");
            }
            previous_best = run.progress.best.total_cost().or(previous_best);

            match run.status {
                RunStatus::Completed => return (run.progress.best, invocations),
                RunStatus::Incomplete => {
                    let bytes = serde_json::to_vec(&run.progress).unwrap();
                    progress = serde_json::from_slice(&bytes).unwrap();
                }
                RunStatus::NoOp => panic!("unexpected no-op"),
            }
        }
    }

    #[test]
    fn test_three_device_example() {
        let (devices, plans) = three_device_scenario();
        let best = run_to_completion(&devices, &plans);
        let result = best.best().unwrap();

        assert_eq!(result.total_cost, dec!(50));
        assert_eq!(result.plan_for("sim-1"), Some("plan-a"));
        assert_eq!(result.plan_for("sim-2"), Some("plan-a"));
        assert_eq!(result.plan_for("sim-3"), Some("plan-b"));
    }

    #[test]
    fn test_every_device_assigned_exactly_once() {
        let (devices, plans) = larger_scenario();
        let best = run_to_completion(&devices, &plans);
        let result = best.best().unwrap();
        assert!(result.covers(&devices));
        let attributed: Decimal = result.assignments.iter().map(|a| a.cost).sum();
        assert_eq!(attributed, result.total_cost);
    }

    #[test]
    fn test_interrupted_run_matches_uninterrupted() {
        let (devices, plans) = larger_scenario();
        let uninterrupted = run_to_completion(&devices, &plans);
        let (interrupted, invocations) = run_interrupted(&devices, &plans, 7);

        assert!(invocations > 1);
        assert_eq!(interrupted.best(), uninterrupted.best());
        assert_eq!(interrupted.evaluated(), uninterrupted.evaluated());
    }

    #[test]
    fn test_single_step_budget_still_progresses() {
        let (devices, plans) = three_device_scenario();
        let (best, invocations) = run_interrupted(&devices, &plans, 1);
        assert_eq!(best.total_cost(), Some(dec!(50)));
        // 3 sequences x 2 strategies x 3 partitions, one partition per invocation
        assert_eq!(invocations, 18);
    }

    #[test]
    fn test_identical_runs_are_identical() {
        let (devices, plans) = larger_scenario();
        assert_eq!(
            run_to_completion(&devices, &plans),
            run_to_completion(&devices, &plans)
        );
    }

    #[test]
    fn test_empty_devices_is_noop() {
        let (_, plans) = three_device_scenario();
        let catalog = RatePoolCollection::build(&plans, &[], &OptimizationSettings::default()).unwrap();
        let model = CostModel::new();
        let engine = AssignmentEngine::new(&[], &catalog, &model);
        let run = engine
            .run(EngineProgress::new(vec![], vec![]), &mut ExecutionBudget::unlimited())
            .unwrap();
        assert_eq!(run.status, RunStatus::NoOp);
        assert!(run.progress.best.best().is_none());
    }

    #[test]
    fn test_empty_collection_is_an_error() {
        let (devices, _) = three_device_scenario();
        let empty = RatePoolCollection::default();
        let model = CostModel::new();
        let engine = AssignmentEngine::new(&devices, &empty, &model);

        let progress = EngineProgress::new(Strategy::ALL.to_vec(), vec![whole_catalog(&empty)]);
        let result = engine.run(progress, &mut ExecutionBudget::unlimited());
        assert!(matches!(result, Err(OptimizerError::EmptyRatePoolCollection)));
    }

    #[test]
    fn test_single_sequence_over_whole_catalog() {
        let (devices, plans) = three_device_scenario();
        let catalog =
            RatePoolCollection::build(&plans, &devices, &OptimizationSettings::default()).unwrap();
        let model = CostModel::new();
        let engine = AssignmentEngine::new(&devices, &catalog, &model);

        let progress = EngineProgress::new(strategies_for(&devices, true), vec![whole_catalog(&catalog)]);
        let run = engine.run(progress, &mut ExecutionBudget::unlimited()).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let best = run.progress.best;
        assert_eq!(best.total_cost(), Some(dec!(50)));
        assert_eq!(best.evaluated(), 2);
    }

    #[test]
    fn test_grouped_strategy_keeps_group_on_one_plan() {
        let mut devices = vec![
            device("sim-1", dec!(20)),
            device("sim-2", dec!(380)),
            device("sim-3", dec!(60)),
        ];
        devices[0].grouping_key = Some("fleet".to_string());
        devices[1].grouping_key = Some("fleet".to_string());
        let (_, plans) = three_device_scenario();
        let catalog =
            RatePoolCollection::build(&plans, &devices, &OptimizationSettings::default()).unwrap();
        let model = CostModel::new();
        let engine = AssignmentEngine::new(&devices, &catalog, &model);

        let grouped = vec![Strategy::new(Grouping::GroupByPlanKey, UsageOrdering::LargestFirst)];
        let progress = EngineProgress::new(grouped, vec![whole_catalog(&catalog)]);
        let run = engine.run(progress, &mut ExecutionBudget::unlimited()).unwrap();
        let result = run.progress.best.best().unwrap();
        assert_eq!(result.plan_for("sim-1"), result.plan_for("sim-2"));
    }
}
