//! `rpo optimize`: dispatch and drain an instance in this process

use anyhow::Result;
use colored::Colorize;
use optimizer_lib::{
    cost::CostModel,
    runtime::{BudgetPolicy, LocalOptimizer, LocalRunReport},
    InstanceStatus,
};
use std::path::Path;
use std::time::Duration;
use tabled::Tabled;

use super::load_request;
use crate::output::{
    color_savings, color_status, format_currency, print_field, print_json, print_section,
    print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct AssignmentRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Current plan")]
    current_plan: String,
    #[tabled(rename = "Assigned plan")]
    plan: String,
    #[tabled(rename = "Cost")]
    cost: String,
}

/// Steps win over a deadline; neither means unlimited
pub fn budget_policy(budget_ms: Option<u64>, safety_margin_ms: u64, steps: Option<u64>) -> BudgetPolicy {
    match (steps, budget_ms) {
        (Some(limit), _) => BudgetPolicy::Steps { limit: limit.max(1) },
        (None, Some(total)) => BudgetPolicy::Deadline {
            total: Duration::from_millis(total),
            safety_margin: Duration::from_millis(safety_margin_ms),
        },
        (None, None) => BudgetPolicy::Unlimited,
    }
}

pub async fn run_optimization(
    path: &Path,
    budget: BudgetPolicy,
    show_assignments: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = load_request(path)?;
    let current_plans: Vec<(String, Option<String>)> = request
        .devices
        .iter()
        .map(|d| (d.id.clone(), d.current_plan_id.clone()))
        .collect();

    let report = LocalOptimizer::new(CostModel::new(), budget).run(request).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_summary(&report);
            if show_assignments {
                print_assignments(&report, &current_plans);
            }
        }
    }

    Ok(())
}

fn print_summary(report: &LocalRunReport) {
    print_section("Optimization");
    print_field("Instance", report.instance_id.cyan());
    print_field("Status", color_status(report.status.as_str()));
    print_field("Invocations", report.invocations);
    print_field("Checkpoints", report.checkpoints);
    print_field("Watcher polls", report.watcher_polls);

    let Some(final_result) = &report.final_result else {
        print_warning("No final result recorded");
        return;
    };
    if report.status != InstanceStatus::Completed {
        print_warning(&final_result.outcome.reason);
    }

    let Some(best) = &final_result.best else {
        return;
    };
    println!();
    print_section("Best Assignment");
    print_field("Total monthly cost", format_currency(best.total_cost).green());
    print_field("Strategy", &best.strategy);
    print_field("Sequence", best.sequence_index);

    if let Some(savings) = &final_result.savings {
        print_field(
            "Current cost",
            savings
                .baseline_cost
                .map(format_currency)
                .unwrap_or_else(|| "n/a".to_string()),
        );
        print_field("Savings", color_savings(savings.savings));
        print_field("Devices changed", savings.devices_changed);
    }
}

fn print_assignments(report: &LocalRunReport, current_plans: &[(String, Option<String>)]) {
    let Some(best) = report.final_result.as_ref().and_then(|r| r.best.as_ref()) else {
        return;
    };

    let rows: Vec<AssignmentRow> = best
        .assignments
        .iter()
        .map(|a| {
            let current = current_plans
                .iter()
                .find(|(id, _)| *id == a.device_id)
                .and_then(|(_, plan)| plan.clone())
                .unwrap_or_else(|| "-".to_string());
            let plan = if current == a.plan_id {
                a.plan_id.clone()
            } else {
                a.plan_id.yellow().to_string()
            };
            AssignmentRow {
                device: a.device_id.clone(),
                current_plan: current,
                plan,
                cost: format_currency(a.cost),
            }
        })
        .collect();

    println!();
    print_table(&rows, "No devices assigned");
}
