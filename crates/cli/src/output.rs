//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: &[T], empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_section(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(50));
}

/// Print a labelled value aligned with its siblings
pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{:<24}{}", format!("{}:", label), value);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Money rounded half away from zero to cents
pub fn format_currency(amount: Decimal) -> String {
    let cents = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if cents.is_sign_negative() && !cents.is_zero() {
        format!("-${:.2}", cents.abs())
    } else {
        format!("${:.2}", cents.abs())
    }
}

/// Savings in green, extra cost in red
pub fn color_savings(savings: Option<Decimal>) -> String {
    match savings {
        None => "n/a".dimmed().to_string(),
        Some(amount) if amount > Decimal::ZERO => format_currency(amount).green().to_string(),
        Some(amount) if amount < Decimal::ZERO => format_currency(amount).red().to_string(),
        Some(amount) => format_currency(amount),
    }
}

/// Color instance and unit statuses
pub fn color_status(status: &str) -> String {
    match status {
        "completed" | "finished" => status.green().to_string(),
        "completed_degraded" | "finished_degraded" => status.yellow().to_string(),
        "running" | "checkpointed" => status.blue().to_string(),
        "pending" | "queued" => status.dimmed().to_string(),
        s if s.starts_with("aborted") => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Snake-case name of a serde enum value
pub fn serde_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => "unknown".to_string(),
    }
}
