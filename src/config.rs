//! Configuration file handling.
//!
//! This module handles loading, merging and validating configuration from
//! `.repograder.toml` files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".repograder.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Repository fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Grading settings.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Record store locations.
    #[serde(default)]
    pub store: StoreConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Base directory for work areas. Defaults to the system temp directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Worker pool limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of repositories processed at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Time limit for one repository, fetch and scoring included.
    #[serde(default = "default_per_task_timeout")]
    pub per_task_timeout_secs: u64,

    /// Time limit for the whole batch (0 = no limit).
    #[serde(default)]
    pub overall_timeout_secs: u64,

    /// How long to wait for abandoned attempts to clean up.
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            per_task_timeout_secs: default_per_task_timeout(),
            overall_timeout_secs: 0,
            cleanup_grace_secs: default_cleanup_grace(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

fn default_per_task_timeout() -> u64 {
    600
}

fn default_cleanup_grace() -> u64 {
    30
}

/// Repository fetch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Shallow clone depth for remote repositories (0 = full history).
    #[serde(default = "default_depth")]
    pub depth: i32,

    /// Branch to check out instead of the default branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Time limit for a single clone.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            branch: None,
            timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_depth() -> i32 {
    1
}

fn default_fetch_timeout() -> u64 {
    300
}

/// Grading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Largest logical line count of a conforming file.
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// File extensions that are graded.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names skipped while scanning.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            extensions: default_extensions(),
            excludes: default_excludes(),
        }
    }
}

fn default_threshold() -> usize {
    crate::scoring::DEFAULT_THRESHOLD
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_excludes() -> Vec<String> {
    crate::scanner::ScanConfig::default().excludes
}

/// Record store locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Submission records (`pending` / `ready` / `consumed` / `error`).
    #[serde(default = "default_input")]
    pub input: String,

    /// Grade sheet written after each run.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
        }
    }
}

fn default_input() -> String {
    "data/submissions.json".to_string()
}

fn default_output() -> String {
    "data/grades.json".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.scratch_dir {
            self.general.scratch_dir = Some(dir.to_string_lossy().into_owned());
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(max_parallel) = args.max_parallel {
            self.pool.max_parallel = max_parallel;
        }
        if let Some(timeout) = args.task_timeout {
            self.pool.per_task_timeout_secs = timeout;
        }
        if let Some(timeout) = args.overall_timeout {
            self.pool.overall_timeout_secs = timeout;
        }

        if let Some(ref branch) = args.branch {
            self.fetch.branch = Some(branch.clone());
        }

        if let Some(threshold) = args.threshold {
            self.scoring.threshold = threshold;
        }
        if let Some(ref extensions) = args.extensions {
            self.scoring.extensions = extensions.clone();
        }
        if let Some(ref excludes) = args.exclude {
            self.scoring.excludes = excludes.clone();
        }

        if let Some(ref input) = args.input {
            self.store.input = input.to_string_lossy().into_owned();
        }
        if let Some(ref output) = args.output {
            self.store.output = output.to_string_lossy().into_owned();
        }
    }

    /// Check limits that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_parallel == 0 {
            bail!("max_parallel must be at least 1");
        }
        if self.pool.per_task_timeout_secs == 0 {
            bail!("Per-task timeout must be at least 1 second");
        }
        if self.fetch.timeout_secs == 0 {
            bail!("Fetch timeout must be at least 1 second");
        }
        if self.fetch.depth < 0 {
            bail!("Fetch depth cannot be negative");
        }
        if self.scoring.threshold == 0 {
            bail!("Line threshold must be at least 1");
        }
        if self.scoring.extensions.iter().all(|e| e.trim().is_empty()) {
            bail!("At least one file extension must be graded");
        }
        Ok(())
    }

    /// Base directory under which each run creates its scratch namespace.
    pub fn scratch_dir(&self) -> PathBuf {
        match self.general.scratch_dir {
            Some(ref dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("repograder"),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
