use anyhow::Context;
use clap::{Parser, Subcommand};
use salesflow::bench::{CommandTarget, Harness, HarnessConfig, PipelineUnderTest};
use salesflow::logging::init_logging;
use salesflow::validator::{Comparison, ReportMode, compare_files};
use salesflow::{DedupConfig, ExecMode, GroupBy, Pipeline, PipelineConfig, PipelineError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "salesflow")]
#[command(about = "Roll up daily sales CSV exports into a canonical aggregate table")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over every CSV file in a directory
    Run {
        data_dir: PathBuf,
        output: PathBuf,
        /// TOML configuration file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// region-category, region-category-month or product
        #[arg(long)]
        group_by: Option<GroupBy>,
        /// Drop exact duplicate records
        #[arg(long)]
        dedup: bool,
        /// Aggregate on a worker pool
        #[arg(long)]
        parallel: bool,
        /// Largest tolerated fraction of rejected rows
        #[arg(long)]
        max_rejection_rate: Option<f64>,
    },
    /// Benchmark this pipeline, optionally against external commands
    Bench {
        data_dir: PathBuf,
        #[arg(long, default_value_t = 5)]
        trials: usize,
        #[arg(long, default_value_t = 2000)]
        cooldown_ms: u64,
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
        /// Where to write the JSON report
        #[arg(long, default_value = "benchmark_results.json")]
        report: PathBuf,
        /// Extra implementation as NAME=COMMAND; `{data_dir}` is substituted
        #[arg(long = "command")]
        commands: Vec<String>,
        /// Configuration passed to each salesflow trial
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Compare two output tables field by field
    Validate {
        expected: PathBuf,
        actual: PathBuf,
        /// Report every divergence instead of the first
        #[arg(long)]
        all: bool,
        /// Print divergences as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_toml_file(p)
            .with_context(|| format!("loading configuration from {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Log `err` and map it to its exit code; errors from outside the taxonomy
/// exit with 70.
fn fail(err: &anyhow::Error) -> ExitCode {
    let code = err.downcast_ref::<PipelineError>().map_or(70, PipelineError::exit_code);
    error!(code, "{err:#}");
    eprintln!("error: {err:#}");
    ExitCode::from(code)
}

fn run_pipeline(
    data_dir: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    group_by: Option<GroupBy>,
    dedup: bool,
    parallel: bool,
    max_rejection_rate: Option<f64>,
) -> ExitCode {
    let mut cfg = match load_config(config.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => return fail(&e),
    };
    if let Some(g) = group_by {
        cfg.aggregation.group_by = g;
    }
    if dedup && cfg.cleaning.dedup.is_none() {
        cfg.cleaning.dedup = Some(DedupConfig::default());
    }
    if parallel {
        cfg.aggregation.exec_mode = ExecMode::Parallel;
    }
    if let Some(rate) = max_rejection_rate {
        cfg.cleaning.max_rejection_rate = rate;
    }
    let pipeline = match Pipeline::new(cfg) {
        Ok(p) => p,
        Err(e) => return fail(&e.into()),
    };

    match pipeline.run(&data_dir, &output) {
        Ok(summary) => {
            info!(output = %summary.output.display(), "run finished");
            summary.metrics.print();
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(
                rows_read = failure.counts.rows_read,
                rows_rejected = failure.counts.rows_rejected,
                "run failed"
            );
            eprintln!("error: {failure}");
            ExitCode::from(failure.exit_code())
        }
    }
}

fn run_bench(
    data_dir: PathBuf,
    harness_cfg: HarnessConfig,
    report_path: PathBuf,
    commands: &[String],
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    // fail on a bad config here rather than once per trial
    Pipeline::new(load_config(config.as_ref())?)?;
    let exe = std::env::current_exe().context("locating the salesflow binary")?;
    let mut targets: Vec<Box<dyn PipelineUnderTest>> =
        vec![Box::new(CommandTarget::salesflow("salesflow", &exe, config.as_deref()))];
    for spec in commands {
        let target = CommandTarget::from_spec(spec).with_context(|| format!("--command {spec}"))?;
        targets.push(Box::new(target));
    }

    let report = Harness::new(harness_cfg)?.run(&data_dir, &targets)?;
    report.print();
    report
        .save_to_file(&report_path)
        .with_context(|| format!("writing report to {}", report_path.display()))?;
    info!(report = %report_path.display(), "benchmark report written");
    Ok(())
}

fn run_validate(expected: PathBuf, actual: PathBuf, all: bool, json: bool) -> ExitCode {
    let mode = if all { ReportMode::All } else { ReportMode::FirstOnly };
    match compare_files(&expected, &actual, mode) {
        Ok(Comparison::Match) => {
            println!("outputs match");
            ExitCode::SUCCESS
        }
        Ok(cmp) => {
            if json {
                match cmp.to_json() {
                    Ok(text) => println!("{text}"),
                    Err(e) => error!("could not serialize divergences: {e}"),
                }
            } else {
                cmp.print_divergences();
            }
            ExitCode::from(1)
        }
        Err(e) => fail(&e.into()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Run { data_dir, output, config, group_by, dedup, parallel, max_rejection_rate } => {
            run_pipeline(data_dir, output, config, group_by, dedup, parallel, max_rejection_rate)
        }
        Commands::Bench { data_dir, trials, cooldown_ms, timeout_secs, report, commands, config } => {
            let harness_cfg = HarnessConfig {
                trials,
                cooldown: Duration::from_millis(cooldown_ms),
                trial_timeout: Duration::from_secs(timeout_secs),
                min_retained: HarnessConfig::default().min_retained.min(trials),
                ..HarnessConfig::default()
            };
            match run_bench(data_dir, harness_cfg, report, &commands, config) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => fail(&e),
            }
        }
        Commands::Validate { expected, actual, all, json } => run_validate(expected, actual, all, json),
    }
}
