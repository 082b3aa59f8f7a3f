//! `rpo status`

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_savings, color_status, format_currency, print_field, print_json, print_section,
    print_table, OutputFormat,
};

#[derive(Tabled)]
struct UnitStatusRow {
    #[tabled(rename = "Unit status")]
    status: String,
    #[tabled(rename = "Units")]
    count: usize,
}

pub async fn show_status(client: &ApiClient, instance_id: &str, format: OutputFormat) -> Result<()> {
    let Some(view) = client.instance(instance_id).await? else {
        anyhow::bail!("Instance {} not found", instance_id);
    };

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Table => {
            print_section("Instance");
            print_field("Instance", view.instance_id.cyan());
            print_field("Status", color_status(view.status.as_str()));
            if let Some(reason) = &view.reason {
                print_field("Reason", reason);
            }
            print_field("Devices", view.devices);
            print_field("Plans", view.plans);
            print_field("Sequences", view.sequences);
            print_field("Units of work", view.units);
            println!();

            let rows: Vec<UnitStatusRow> = view
                .unit_statuses
                .iter()
                .map(|(status, count)| UnitStatusRow {
                    status: color_status(status),
                    count: *count,
                })
                .collect();
            print_table(&rows, "No units recorded");

            if let Some(best) = view.final_result.as_ref().and_then(|r| r.best.as_ref()) {
                println!();
                print_field("Total monthly cost", format_currency(best.total_cost).green());
                print_field("Strategy", &best.strategy);
            }
            if let Some(savings) = view.final_result.as_ref().and_then(|r| r.savings.as_ref()) {
                print_field("Savings", color_savings(savings.savings));
            }
        }
    }

    Ok(())
}
