//! Error types for fetching, scoring and dispatching.
//!
//! Per-task errors (`FetchError`, `ScoreError`, `PoolError`) are turned into
//! [`TaskOutcome::Failure`](crate::models::TaskOutcome) values and never abort
//! a batch. Only [`DispatchError`] escapes `run_batch`, because it signals a
//! bug in the engine rather than a bad submission.

use crate::models::{FailureKind, TaskId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to materialize a repository into a work area.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Repository unreachable: {reference}: {reason}")]
    Unreachable { reference: String, reason: String },

    #[error("Repository not found: {reference}: {reason}")]
    NotFound { reference: String, reason: String },

    #[error("Fetching {reference} timed out after {}s", .after.as_secs())]
    Timeout { reference: String, after: Duration },

    #[error("Authentication required for {reference}: {reason}")]
    Auth { reference: String, reason: String },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Work area error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Unreachable { .. } => FailureKind::Unreachable,
            FetchError::NotFound { .. } => FailureKind::NotFound,
            FetchError::Timeout { .. } => FailureKind::Timeout,
            FetchError::Auth { .. } => FailureKind::Auth,
            FetchError::Cancelled | FetchError::Io(_) => FailureKind::Internal,
        }
    }
}

/// Failure to compute a grade for a fetched tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("No gradable source files ({scanned} scanned, {unparsed} unparseable)")]
    NoSourceFiles { scanned: usize, unparsed: usize },

    #[error("Failed to parse {}: {reason}", .file.display())]
    ParseError { file: PathBuf, reason: String },
}

impl ScoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScoreError::NoSourceFiles { .. } => FailureKind::NoSourceFiles,
            ScoreError::ParseError { .. } => FailureKind::ParseError,
        }
    }
}

/// Conditions imposed on a task by the pool rather than by the worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Task exceeded its {}s time limit", .0.as_secs_f64())]
    TaskTimeout(Duration),

    #[error("Task cancelled")]
    Cancelled,
}

/// Invariant violations inside the dispatcher. These abort the run.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("max_parallel must be at least 1")]
    InvalidParallelism,

    #[error("Task id submitted twice: {0}")]
    DuplicateTask(TaskId),

    #[error("Outcome recorded twice for task {0}")]
    DuplicateOutcome(TaskId),

    #[error("Outcome received for unknown task {0}")]
    UnknownTask(TaskId),

    #[error("No outcome recorded for task {0}")]
    MissingOutcome(TaskId),

    #[error("{} work area(s) left on disk after the run", .paths.len())]
    WorkAreaLeak { paths: Vec<PathBuf> },

    #[error("Scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kinds() {
        let err = FetchError::Auth {
            reference: "https://example.com/r.git".to_string(),
            reason: "401".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Auth);

        let err = FetchError::Timeout {
            reference: "https://example.com/r.git".to_string(),
            after: Duration::from_secs(5),
        };
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_score_error_display() {
        let err = ScoreError::ParseError {
            file: PathBuf::from("src/main.py"),
            reason: "not valid UTF-8".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::ParseError);
        assert!(err.to_string().contains("src/main.py"));

        let err = ScoreError::NoSourceFiles {
            scanned: 3,
            unparsed: 3,
        };
        assert_eq!(err.kind(), FailureKind::NoSourceFiles);
    }

    #[test]
    fn test_leak_error_counts_paths() {
        let err = DispatchError::WorkAreaLeak {
            paths: vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")],
        };
        assert!(err.to_string().starts_with("2 work area"));
    }
}
