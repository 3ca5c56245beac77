//! RepoGrader - concurrent repository fetcher and code-size grader
//!
//! A CLI tool that fetches submitted repositories in parallel, measures
//! logical lines per source file and grades each submission by the share
//! of code that lives in reasonably sized files.
//!
//! Exit codes:
//!   0 - Run completed (individual submissions may still have failed)
//!   1 - Runtime error (config, record store, leaked work areas, etc.)
//!   2 - Run halted early (cancelled or overall timeout)

mod analysis;
mod cli;
mod config;
mod engine;
mod error;
mod models;
mod repo;
mod report;
mod scanner;
mod scoring;
mod store;

use anyhow::{Context, Result};
use cli::Args;
use config::Config;
use engine::{AnalysisWorker, Dispatcher, PoolOptions};
use indicatif::{ProgressBar, ProgressStyle};
use models::{RunReport, Task, TaskOutcome};
use repo::{CloneOptions, GitFetcher, ScratchRoot};
use scoring::QualityScorer;
use std::path::Path;
use std::sync::{Arc, Mutex};
use store::{GradeSheet, RecordStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args)?;

    info!("RepoGrader v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .repograder.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(config::DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", config::DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize parallelism, timeouts, threshold, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG` takes precedence over `--verbose` / `--quiet`.
fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    match args.log_file {
        Some(ref path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set tracing subscriber")?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set tracing subscriber")?;
        }
    }

    Ok(())
}

/// Run the grading workflow. Returns the exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    if let Some(ref local) = args.local {
        return score_local(local, &config);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(handle_ctrl_c(cancel.clone()));

    // Tasks come from --repo or from the record store.
    let mut store = None;
    let tasks: Vec<Task> = if args.is_ad_hoc() {
        args.repo
            .iter()
            .enumerate()
            .map(|(i, reference)| Task::new(format!("repo-{}", i + 1), reference.as_str()))
            .collect()
    } else {
        let input = Path::new(&config.store.input);
        let opened = RecordStore::open(input)
            .with_context(|| format!("Failed to open submissions at {}", input.display()))?;
        let ready = opened.ready_tasks();
        info!(
            "{} of {} submission(s) ready in {}",
            ready.len(),
            opened.records().len(),
            input.display()
        );
        store = Some(opened);
        ready
    };

    if tasks.is_empty() {
        println!("Nothing to grade: no ready submissions.");
        return Ok(0);
    }

    let scratch_base = config.scratch_dir();
    let scratch = Arc::new(ScratchRoot::create(&scratch_base).with_context(|| {
        format!("Failed to create scratch directory in {}", scratch_base.display())
    })?);

    let fetcher = Arc::new(GitFetcher::new(CloneOptions::from(&config.fetch)));
    let worker = AnalysisWorker::new(
        fetcher,
        QualityScorer::from(&config.scoring),
        Arc::clone(&scratch),
    );

    let mut dispatcher = Dispatcher::new(Arc::new(worker), PoolOptions::from(&config.pool));
    if !args.quiet {
        dispatcher = dispatcher.with_progress(progress_bar(tasks.len()));
    }

    println!(
        "🔬 Grading {} repositor{} ({} in parallel)...",
        tasks.len(),
        if tasks.len() == 1 { "y" } else { "ies" },
        config.pool.max_parallel
    );

    let report = dispatcher
        .run_batch(tasks, cancel)
        .await
        .context("Grading run aborted")?;

    // Downstream records are written before statuses advance upstream, so a
    // crash in between only causes a re-grade.
    if let Some(mut store) = store {
        let output = Path::new(&config.store.output);
        let mut sheet = GradeSheet::load(output)
            .with_context(|| format!("Failed to load grade sheet {}", output.display()))?;
        sheet.merge(&report);
        sheet.save()?;

        if args.no_mark {
            debug!("--no-mark given, submission statuses left unchanged");
        } else {
            store.apply_report(&report);
            store.save()?;
        }
    }

    if let Some(ref path) = args.report {
        report::write_report(&report, path, args.format)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report saved to {}", path.display());
    }

    print_summary(&report, args.is_ad_hoc());

    if report.is_complete() {
        Ok(0)
    } else {
        warn!("Run {}: {} task(s) not started", report.status, report.unresolved.len());
        Ok(2)
    }
}

/// Handle --local: grade one directory in place.
fn score_local(dir: &Path, config: &Config) -> Result<i32> {
    let scorer = QualityScorer::from(&config.scoring);
    let files = scorer.measure(dir);

    for file in files.iter().filter(|f| f.oversized) {
        if file.parsed {
            println!("   📄 {} ({} lines, over {})", file.path, file.line_count, scorer.threshold());
        } else {
            println!("   📄 {} (unparseable)", file.path);
        }
    }

    let score = scoring::aggregate(&files)
        .with_context(|| format!("Cannot grade {}", dir.display()))?;

    println!("\n📊 {}", dir.display());
    println!("   Files: {} ({} oversized)", score.files_considered, score.files_oversized);
    println!(
        "   Lines: {} total, {} in conforming files",
        score.total_lines, score.conforming_lines
    );
    println!("   Grade: {:.2}", score.grade);
    Ok(0)
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    pb.set_style(style);
    pb
}

/// Print the console summary of a run.
fn print_summary(report: &RunReport, per_task: bool) {
    let summary = &report.summary;

    if per_task {
        println!();
        for (id, outcome) in &report.outcomes {
            match outcome {
                TaskOutcome::Success(score) => println!("   {}: {:.2}", id, score.grade),
                TaskOutcome::Failure { kind, message } => {
                    println!("   {}: {} ({})", id, kind, message)
                }
                TaskOutcome::Cancelled => println!("   {}: cancelled", id),
            }
        }
    }

    println!("\n📊 Run Summary:");
    println!("   Status: {}", report.status);
    println!(
        "   Graded: {} | Failed: {} | Cancelled: {} | Total: {}",
        summary.succeeded, summary.failed, summary.cancelled, summary.total
    );
    for (kind, count) in &summary.by_failure {
        println!("   - {}: {}", kind, count);
    }
    println!("   Duration: {:.1}s", report.duration_seconds);
}

/// Ctrl+C handler with two-phase shutdown.
///
/// First Ctrl+C cancels the run: nothing new starts and in-flight tasks stop
/// at their next checkpoint. Second Ctrl+C exits immediately.
async fn handle_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(1);
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
