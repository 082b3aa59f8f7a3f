//! Rate Plan Optimizer CLI
//!
//! Validates catalogs, previews candidate plan sequences, runs optimizations
//! in-process and queries a running worker for instance status.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{optimize, sequences, status, validate};
use optimizer_lib::sequence::SequenceMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Rate Plan Optimizer CLI
#[derive(Parser)]
#[command(name = "rpo")]
#[command(author, version, about = "CLI for the Rate Plan Optimizer", long_about = None)]
pub struct Cli {
    /// Worker API URL (falls back to ~/.config/rpo/config.json, then localhost)
    #[arg(long, env = "RPO_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Log optimizer activity to stderr
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a request file's catalog and devices without optimizing
    Validate {
        /// Request JSON file
        request: PathBuf,
    },

    /// Preview the plan sequences an instance would be split into
    Sequences {
        /// Request JSON file
        request: PathBuf,

        /// Override the request's sequence mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Override the request's sequence cap
        #[arg(long)]
        cap: Option<usize>,

        /// Show at most this many sequences
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Run an optimization end to end in this process
    Optimize {
        /// Request JSON file
        request: PathBuf,

        /// Wall-clock budget per invocation in milliseconds
        #[arg(long, conflicts_with = "steps")]
        budget_ms: Option<u64>,

        /// Budget reserved for checkpointing, in milliseconds
        #[arg(long, default_value_t = 0)]
        safety_margin_ms: u64,

        /// Partition assignments per invocation
        #[arg(long)]
        steps: Option<u64>,

        /// List every device's assigned plan
        #[arg(long)]
        assignments: bool,
    },

    /// Show the status of an instance on a running worker
    Status {
        /// Instance ID
        instance_id: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ModeArg {
    Flat,
    ByPlanType,
}

impl From<ModeArg> for SequenceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Flat => SequenceMode::Flat,
            ModeArg::ByPlanType => SequenceMode::ByPlanType,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let settings = config::Config::load()?;
    let format = cli.format.or(settings.format()).unwrap_or_default();

    match cli.command {
        Commands::Validate { request } => {
            validate::validate(&request, format)?;
        }
        Commands::Sequences {
            request,
            mode,
            cap,
            limit,
        } => {
            sequences::show_sequences(&request, mode.map(Into::into), cap, limit, format)?;
        }
        Commands::Optimize {
            request,
            budget_ms,
            safety_margin_ms,
            steps,
            assignments,
        } => {
            let budget = optimize::budget_policy(budget_ms, safety_margin_ms, steps);
            optimize::run_optimization(&request, budget, assignments, format).await?;
        }
        Commands::Status { instance_id } => {
            let api_url = cli
                .api_url
                .or(settings.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string());
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, &instance_id, format).await?;
        }
    }

    Ok(())
}
