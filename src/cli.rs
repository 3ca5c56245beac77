//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// RepoGrader - concurrent code-size grader for student repositories
///
/// Fetches every ready submission, measures logical lines per source file
/// and grades the share of code that lives in reasonably sized files.
///
/// Examples:
///   repograder --input data/submissions.json --output data/grades.json
///   repograder --repo https://github.com/owner/repo.git --repo ../other
///   repograder --local ./my-project --threshold 200
///   repograder --max-parallel 8 --overall-timeout 1800 --report run.md
///   repograder --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Submission records to grade (JSON)
    ///
    /// Only records with status "ready" are processed.
    /// Default: from config or data/submissions.json.
    #[arg(short, long, value_name = "FILE", env = "REPOGRADER_INPUT")]
    pub input: Option<PathBuf>,

    /// Grade sheet to write (JSON)
    #[arg(short, long, value_name = "FILE", env = "REPOGRADER_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Grade this repository instead of the record store (repeatable)
    ///
    /// Tasks are named repo-1, repo-2, ... in the order given.
    #[arg(short, long, value_name = "URL")]
    pub repo: Vec<String>,

    /// Grade a local directory directly, without fetching
    #[arg(long, value_name = "DIR", conflicts_with = "repo")]
    pub local: Option<PathBuf>,

    /// Maximum number of repositories processed at once
    #[arg(short = 'j', long, value_name = "NUM", env = "REPOGRADER_MAX_PARALLEL")]
    pub max_parallel: Option<usize>,

    /// Time limit per repository in seconds
    #[arg(long, value_name = "SECS")]
    pub task_timeout: Option<u64>,

    /// Time limit for the whole run in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    pub overall_timeout: Option<u64>,

    /// Largest logical line count of a conforming file
    #[arg(short, long, value_name = "LINES")]
    pub threshold: Option<usize>,

    /// File extensions to grade (comma-separated)
    ///
    /// Example: --extensions py,pyi
    #[arg(long, value_name = "EXTS", value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Directory or file names to skip (comma-separated)
    ///
    /// Example: --exclude tests,migrations
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub exclude: Option<Vec<String>>,

    /// Branch to check out instead of the default branch
    #[arg(short, long, value_name = "BRANCH")]
    pub branch: Option<String>,

    /// Base directory for temporary work areas
    #[arg(long, value_name = "DIR", env = "REPOGRADER_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Write a run report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Report format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Do not update submission statuses in the input file
    #[arg(long)]
    pub no_mark: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .repograder.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Generate a default .repograder.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether tasks come from `--repo` rather than the record store.
    pub fn is_ad_hoc(&self) -> bool {
        !self.repo.is_empty()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.max_parallel == Some(0) {
            return Err("--max-parallel must be at least 1".to_string());
        }

        if self.task_timeout == Some(0) {
            return Err("--task-timeout must be at least 1 second".to_string());
        }

        if self.threshold == Some(0) {
            return Err("--threshold must be at least 1".to_string());
        }

        if self.repo.iter().any(|r| r.trim().is_empty()) {
            return Err("--repo cannot be empty".to_string());
        }

        // Validate local directory if provided
        if let Some(ref local_path) = self.local {
            if !local_path.exists() {
                return Err(format!(
                    "Local directory does not exist: {}",
                    local_path.display()
                ));
            }
            if !local_path.is_dir() {
                return Err(format!(
                    "Local path is not a directory: {}",
                    local_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
