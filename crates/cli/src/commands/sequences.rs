//! `rpo sequences`

use anyhow::{Context, Result};
use optimizer_lib::{
    cost::validate_catalog,
    pool::RatePoolCollection,
    sequence::{bind_units, Sequence, SequenceGenerator, SequenceMode},
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use super::load_request;
use crate::output::{
    format_currency, print_field, print_info, print_json, print_section, print_table, serde_name,
    OutputFormat,
};

#[derive(Tabled)]
struct PoolRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Plan")]
    plan: String,
    #[tabled(rename = "Type")]
    plan_type: String,
    #[tabled(rename = "Monthly")]
    monthly: String,
    #[tabled(rename = "Useful allowance")]
    useful_allowance: Decimal,
    #[tabled(rename = "Cost / unit")]
    effectiveness: String,
    #[tabled(rename = "Pooled")]
    pooled: bool,
}

#[derive(Tabled)]
struct SequenceRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Unit")]
    unit: usize,
    #[tabled(rename = "Plans")]
    plans: String,
}

#[derive(Debug, Serialize)]
pub struct SequencePreview {
    pub instance_id: String,
    pub mode: SequenceMode,
    pub cap: usize,
    pub ranked_plans: Vec<String>,
    pub units: usize,
    pub sequences: Vec<Sequence>,
    /// Unit index per sequence, parallel to `sequences`
    pub unit_of_sequence: Vec<usize>,
    #[serde(skip)]
    pub catalog: RatePoolCollection,
}

pub fn preview(path: &Path, mode: Option<SequenceMode>, cap: Option<usize>) -> Result<SequencePreview> {
    let mut request = load_request(path)?;
    if let Some(mode) = mode {
        request.settings.sequence_mode = mode;
    }
    if let Some(cap) = cap {
        request.settings.sequence_cap = cap;
    }

    validate_catalog(&request.plans).context("Catalog cannot be sequenced")?;
    let catalog = RatePoolCollection::build(&request.plans, &request.devices, &request.settings)?;
    let generator = SequenceGenerator::from_settings(&request.settings);
    let sequences = generator.generate(&catalog);
    let units = bind_units(
        &request.instance_id,
        &sequences,
        request.settings.sequences_per_unit,
    );

    let mut unit_of_sequence = vec![0; sequences.len()];
    for unit in &units {
        for &index in &unit.sequence_indices {
            if let Some(slot) = unit_of_sequence.get_mut(index) {
                *slot = unit.index;
            }
        }
    }

    Ok(SequencePreview {
        instance_id: request.instance_id,
        mode: generator.mode(),
        cap: generator.cap(),
        ranked_plans: catalog.plan_ids(),
        units: units.len(),
        sequences,
        unit_of_sequence,
        catalog,
    })
}

pub fn show_sequences(
    path: &Path,
    mode: Option<SequenceMode>,
    cap: Option<usize>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let preview = preview(path, mode, cap)?;

    match format {
        OutputFormat::Json => print_json(&preview)?,
        OutputFormat::Table => {
            print_section("Rate Pools");
            let pools: Vec<PoolRow> = preview
                .catalog
                .pools()
                .iter()
                .enumerate()
                .map(|(rank, pool)| PoolRow {
                    rank: rank + 1,
                    plan: pool.plan_id().to_string(),
                    plan_type: pool.plan().plan_type.clone(),
                    monthly: format_currency(pool.plan().monthly_cost),
                    useful_allowance: pool.useful_allowance(),
                    effectiveness: pool
                        .effectiveness()
                        .map(|e| e.round_dp(4).to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    pooled: pool.is_pooled(),
                })
                .collect();
            print_table(&pools, "No rate plans");
            println!();

            print_section("Sequences");
            print_field("Instance", &preview.instance_id);
            print_field("Mode", serde_name(&preview.mode));
            print_field("Cap", preview.cap);
            print_field("Sequences", preview.sequences.len());
            print_field("Units of work", preview.units);
            println!();

            let rows: Vec<SequenceRow> = preview
                .sequences
                .iter()
                .zip(&preview.unit_of_sequence)
                .take(limit)
                .map(|(sequence, unit)| SequenceRow {
                    index: sequence.index,
                    unit: *unit,
                    plans: sequence.plan_ids.join(" → "),
                })
                .collect();
            print_table(&rows, "No sequences generated");
            if preview.sequences.len() > limit {
                print_info(&format!(
                    "{} more not shown; raise --limit to see them",
                    preview.sequences.len() - limit
                ));
            }
        }
    }

    Ok(())
}
