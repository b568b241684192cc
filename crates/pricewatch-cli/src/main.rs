use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use pricewatch_core::{DiffEngine, DiffPolicy};
use pricewatch_sync::{load_records, report_history_markdown, RunConfig, RunPipeline, RunStatus};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pricewatch")]
#[command(about = "Supplier SMS price-update diff")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract today's prices, diff against the last snapshot and write reports.
    Run(RunArgs),
    /// Compare two snapshot or record files and print the diff as JSON.
    Diff {
        #[arg(long)]
        current: PathBuf,
        #[arg(long)]
        previous: PathBuf,
        #[arg(long)]
        policy: Option<String>,
    },
    /// List recent report directories.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        reports: Option<PathBuf>,
    },
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    #[arg(long)]
    messages: Option<PathBuf>,
    #[arg(long)]
    snapshots: Option<PathBuf>,
    #[arg(long)]
    reports: Option<PathBuf>,
    #[arg(long)]
    rules: Option<PathBuf>,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    policy: Option<String>,
}

impl RunArgs {
    fn apply(self, mut config: RunConfig) -> Result<RunConfig> {
        if let Some(dir) = self.messages {
            config.messages_dir = dir;
        }
        if let Some(dir) = self.snapshots {
            config.snapshots_dir = dir;
        }
        if let Some(dir) = self.reports {
            config.reports_dir = dir;
        }
        if let Some(dir) = self.rules {
            config.rules_dir = dir;
        }
        if let Some(date) = self.date {
            config.run_date = date;
        }
        if let Some(name) = self.policy {
            config.policy = parse_policy(&name)?;
        }
        Ok(config)
    }
}

fn parse_policy(name: &str) -> Result<DiffPolicy> {
    DiffPolicy::by_name(name)
        .ok_or_else(|| anyhow!("unknown diff policy `{name}` (expected tolerant or fixed)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let config = args.apply(RunConfig::from_env())?;
            let summary = RunPipeline::new(config)?.run_once().await?;
            match summary.status {
                RunStatus::Completed => println!(
                    "{}\nrun_id={} records={} failed_sources={} reports={}",
                    summary.subject.as_deref().unwrap_or_default(),
                    summary.run_id,
                    summary.extracted_records,
                    summary.failed_sources.len(),
                    summary
                        .reports
                        .as_ref()
                        .map(|r| r.dir.display().to_string())
                        .unwrap_or_default()
                ),
                RunStatus::NothingExtracted => {
                    eprintln!(
                        "no price rows extracted from {} message(s); snapshot and reports left unchanged",
                        summary.messages
                    );
                    std::process::exit(2);
                }
            }
        }
        Commands::Diff {
            current,
            previous,
            policy,
        } => {
            let policy = policy.as_deref().map(parse_policy).transpose()?.unwrap_or_default();
            let current = load_records(&current).await?;
            let previous = load_records(&previous).await?;
            let diff = DiffEngine::new(policy).diff(&current, &previous);
            info!(
                policy = policy.name(),
                changed = diff.changed.len(),
                new = diff.new.len(),
                removed = diff.removed.len(),
                "diff computed"
            );
            println!("{}", serde_json::to_string_pretty(&diff)?);
        }
        Commands::Report { runs, reports } => {
            let reports = reports.unwrap_or_else(|| RunConfig::from_env().reports_dir);
            println!("{}", report_history_markdown(runs, &reports)?);
        }
    }

    Ok(())
}
