//! CLI definition and dispatch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::regime_table::RegimeTable;
use crate::domain::config_validation::{
    BatchConfig, EngineConfig, load_batch_config, parse_strategies, validate_engine_config,
};
use crate::domain::error::{ConfigError, NexoraError};
use crate::domain::report::{Report, RunStatus};
use crate::domain::runner::{JobPlan, Runner};
use crate::domain::strategy::Strategy;
use crate::domain::universe::{MarketData, parse_assets};
use crate::ports::data_port::DataPort;
use crate::ports::regime_port::RegimePort;
use crate::ports::report_port::ReportPort;

/// Exit code when the batch finished but at least one run failed.
pub const EXIT_RUN_FAILED: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "nexora", about = "Multi-strategy backtesting engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a batch of backtests
    Run(RunArgs),
    /// Validate a configuration file without running anything
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List assets available in the configured data directory
    ListAssets {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    #[arg(short, long)]
    pub config: PathBuf,
    /// Strategy to run; repeatable. Replaces `[batch] strategies`.
    #[arg(short, long = "strategy")]
    pub strategies: Vec<String>,
    /// Asset (`BTC`) or pair (`ETH/BTC`); repeatable. Replaces `[batch] assets`.
    #[arg(short, long = "asset")]
    pub assets: Vec<String>,
    /// Run every parameter grid point instead of the defaults
    #[arg(long)]
    pub sweep: bool,
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Directory for bars.csv, summary.csv and trades.csv
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Logs go to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run(args) => run_batch_command(&args),
        Command::Validate { config } => run_validate(&config),
        Command::ListAssets { config } => run_list_assets(&config),
    }
}

fn fail(err: &NexoraError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, NexoraError> {
    Ok(FileConfigAdapter::from_file(path)?)
}

/// Loads and validates everything a batch needs, applying command line
/// overrides on top of the file.
pub fn resolve_run(
    args: &RunArgs,
    config: &FileConfigAdapter,
) -> Result<(EngineConfig, BatchConfig), ConfigError> {
    let mut engine = validate_engine_config(config)?;
    if let Some(workers) = args.workers {
        engine.workers = workers;
    }
    engine.validate()?;

    let mut batch = load_batch_config(config)?;
    apply_overrides(&mut batch, args)?;
    batch.validate()?;
    Ok((engine, batch))
}

pub fn apply_overrides(batch: &mut BatchConfig, args: &RunArgs) -> Result<(), ConfigError> {
    if !args.strategies.is_empty() {
        batch.strategies = parse_strategies(&args.strategies)?;
    }
    if !args.assets.is_empty() {
        batch.assets = parse_assets(&args.assets.join(","))?;
    }
    if args.sweep {
        batch.sweep = true;
    }
    if let Some(dir) = &args.data_dir {
        batch.data_dir = dir.clone();
    }
    Ok(())
}

/// Loads data, runs every job and writes the report if `output` is given.
pub fn run_pipeline(
    engine: EngineConfig,
    batch: &BatchConfig,
    data_port: &dyn DataPort,
    regimes: Option<&dyn RegimePort>,
    output: Option<&Path>,
) -> Result<Report, NexoraError> {
    let runner = Runner::new(engine)?;
    let plan = JobPlan::from_batch(batch);
    let data = MarketData::load(data_port, &batch.assets);
    let report = runner.run(&plan, &data, regimes)?;

    if let Some(dir) = output {
        CsvReportAdapter::new().write(&report, dir)?;
    }
    Ok(report)
}

/// 0 when every run completed or halted, [`EXIT_RUN_FAILED`] otherwise.
pub fn report_exit_code(report: &Report) -> ExitCode {
    if report.any_failed() {
        ExitCode::from(EXIT_RUN_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}

fn run_batch_command(args: &RunArgs) -> ExitCode {
    eprintln!("Loading config from {}", args.config.display());
    let config = match load_config(&args.config) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let (engine, batch) = match resolve_run(args, &config) {
        Ok(resolved) => resolved,
        Err(e) => return fail(&NexoraError::from(e)),
    };

    let regimes = match &batch.regime_file {
        Some(path) => match RegimeTable::from_file(path) {
            Ok(table) => Some(table),
            Err(e) => return fail(&e),
        },
        None => None,
    };

    let data_port = CsvAdapter::new(batch.data_dir.clone());
    let report = match run_pipeline(
        engine,
        &batch,
        &data_port,
        regimes.as_ref().map(|r| r as &dyn RegimePort),
        args.output.as_deref(),
    ) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    print_summary(&report);
    if let Some(dir) = &args.output {
        eprintln!("\nReport written to: {}", dir.display());
    }
    report_exit_code(&report)
}

fn print_summary(report: &Report) {
    eprintln!("\n=== Batch Results ===");
    eprintln!(
        "Runs: {}  completed: {}  halted: {}  failed: {}",
        report.len(),
        report.count_by_status(RunStatus::Completed),
        report.count_by_status(RunStatus::Halted),
        report.count_by_status(RunStatus::Failed),
    );

    eprintln!("\n=== Per-Strategy Summary ===");
    for s in report.summary_by_strategy() {
        eprintln!(
            "  {}: {} runs, return {:.2}%, sharpe {:.2}, max dd -{:.1}%, win rate {:.1}%",
            s.strategy,
            s.runs,
            s.mean_total_return * 100.0,
            s.mean_sharpe_ratio,
            s.mean_max_drawdown * 100.0,
            s.mean_win_rate * 100.0,
        );
    }

    let halted: Vec<_> = report.iter().filter(|r| r.halted_at.is_some()).collect();
    if !halted.is_empty() {
        eprintln!("\n=== Halted Runs ===");
        for run in halted {
            if let Some(ts) = run.halted_at {
                eprintln!("  {} at {}", run.key, ts);
            }
        }
    }

    if report.any_failed() {
        eprintln!("\n=== Failed Runs ===");
        for run in report.failures() {
            eprintln!("  {}: {}", run.key, run.error.as_deref().unwrap_or("unknown error"));
        }
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let args = RunArgs {
        config: config_path.to_path_buf(),
        ..RunArgs::default()
    };
    let (engine, batch) = match resolve_run(&args, &config) {
        Ok(resolved) => resolved,
        Err(e) => return fail(&NexoraError::from(e)),
    };

    let plan = JobPlan::from_batch(&batch);
    eprintln!("  initial capital:   {}", engine.initial_capital);
    eprintln!("  max drawdown:      {}%", engine.limits.max_drawdown_pct);
    eprintln!("  max gross:         {}x", engine.limits.max_gross_exposure);
    eprintln!("  workers:           {}", engine.workers);
    eprintln!(
        "  strategies:        {}",
        batch
            .strategies
            .iter()
            .map(Strategy::name)
            .collect::<Vec<_>>()
            .join(", ")
    );
    eprintln!(
        "  assets:            {}",
        batch
            .assets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    eprintln!("  jobs:              {}", plan.job_count());
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_list_assets(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let batch = match load_batch_config(&config) {
        Ok(b) => b,
        Err(e) => return fail(&NexoraError::from(e)),
    };

    let adapter = CsvAdapter::new(batch.data_dir);
    match adapter.list_assets() {
        Ok(assets) => {
            if assets.is_empty() {
                eprintln!("No assets found in {}", adapter.base_path().display());
            }
            for asset in &assets {
                println!("{asset}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
