//! Data models for the grading engine.
//!
//! This module contains the task, outcome and report types that flow
//! between the fetcher, the scorer, the worker pool and the record store.

use crate::error::{FetchError, PoolError, ScoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque, stable identifier of a submission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single repository to fetch and grade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within a batch.
    pub id: TaskId,
    /// Where to fetch the repository from (URL or local path).
    pub source_reference: String,
}

impl Task {
    pub fn new(id: impl Into<String>, source_reference: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            source_reference: source_reference.into(),
        }
    }
}

/// Measurement of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the work area root.
    pub path: String,
    /// Logical lines of code (blank and comment-only lines excluded).
    pub line_count: usize,
    /// Above the size threshold, or unparseable.
    pub oversized: bool,
    /// Whether the file could be parsed. Unparsed files carry no weight.
    pub parsed: bool,
}

/// Aggregate measurement of a source tree, before it is tied to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeScore {
    pub grade: f64,
    pub files_considered: usize,
    pub files_oversized: usize,
    pub files_unparsed: usize,
    pub total_lines: usize,
    pub conforming_lines: usize,
}

/// Grade of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub task_id: TaskId,
    /// Percentage of logical lines that live in conforming files, 2 decimals.
    pub grade: f64,
    pub files_considered: usize,
    pub files_oversized: usize,
    pub files_unparsed: usize,
    pub total_lines: usize,
    pub conforming_lines: usize,
}

impl ScoreResult {
    pub fn new(task_id: TaskId, score: TreeScore) -> Self {
        Self {
            task_id,
            grade: score.grade,
            files_considered: score.files_considered,
            files_oversized: score.files_oversized,
            files_unparsed: score.files_unparsed,
            total_lines: score.total_lines,
            conforming_lines: score.conforming_lines,
        }
    }
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    NotFound,
    Timeout,
    Auth,
    NoSourceFiles,
    ParseError,
    /// Worker panic or local I/O problem.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Unreachable => write!(f, "unreachable"),
            FailureKind::NotFound => write!(f, "not_found"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Auth => write!(f, "auth"),
            FailureKind::NoSourceFiles => write!(f, "no_source_files"),
            FailureKind::ParseError => write!(f, "parse_error"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

/// Terminal result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success(ScoreResult),
    Failure { kind: FailureKind, message: String },
    Cancelled,
}

impl TaskOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        TaskOutcome::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            TaskOutcome::Success(_) => OutcomeKind::Success,
            TaskOutcome::Failure { .. } => OutcomeKind::Failure,
            TaskOutcome::Cancelled => OutcomeKind::Cancelled,
        }
    }

    pub fn grade(&self) -> Option<f64> {
        match self {
            TaskOutcome::Success(score) => Some(score.grade),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TaskOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<FetchError> for TaskOutcome {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => TaskOutcome::Cancelled,
            other => TaskOutcome::failure(other.kind(), other.to_string()),
        }
    }
}

impl From<ScoreError> for TaskOutcome {
    fn from(err: ScoreError) -> Self {
        TaskOutcome::failure(err.kind(), err.to_string())
    }
}

impl From<PoolError> for TaskOutcome {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::TaskTimeout(_) => TaskOutcome::failure(FailureKind::Timeout, err.to_string()),
            PoolError::Cancelled => TaskOutcome::Cancelled,
        }
    }
}

/// Coarse classification of an outcome, for downstream records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "success"),
            OutcomeKind::Failure => write!(f, "failure"),
            OutcomeKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task was dispatched and resolved.
    Completed,
    /// An external cancellation request stopped the run.
    Cancelled,
    /// The overall time limit stopped the run.
    TimedOut,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Outcome counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Failures grouped by kind.
    pub by_failure: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TaskOutcome>) -> Self {
        let mut summary = Self::default();

        for outcome in outcomes {
            summary.total += 1;
            match outcome {
                TaskOutcome::Success(_) => summary.succeeded += 1,
                TaskOutcome::Failure { kind, .. } => {
                    summary.failed += 1;
                    *summary.by_failure.entry(kind.to_string()).or_insert(0) += 1;
                }
                TaskOutcome::Cancelled => summary.cancelled += 1,
            }
        }

        summary
    }
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: RunStatus,
    /// One outcome per submitted task, keyed (and therefore ordered) by id.
    pub outcomes: BTreeMap<TaskId, TaskOutcome>,
    /// Tasks that were never dispatched because the run halted.
    pub unresolved: Vec<TaskId>,
    pub summary: RunSummary,
}

impl RunReport {
    /// True when the run was not halted early.
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Flatten the report into records for the downstream store.
    pub fn grade_records(&self) -> Vec<GradeRecord> {
        self.outcomes
            .iter()
            .map(|(id, outcome)| GradeRecord::from_outcome(id.clone(), outcome))
            .collect()
    }
}

/// Lifecycle state of a record in a tabular store.
///
/// `pending -> ready -> consumed | error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Ready,
    #[serde(alias = "completed")]
    Consumed,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Ready => write!(f, "ready"),
            Status::Consumed => write!(f, "consumed"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Downstream record: one grade per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub id: TaskId,
    pub grade: Option<f64>,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub status: Status,
}

impl GradeRecord {
    pub fn from_outcome(id: TaskId, outcome: &TaskOutcome) -> Self {
        let status = match outcome {
            TaskOutcome::Success(_) => Status::Ready,
            TaskOutcome::Failure { .. } => Status::Error,
            TaskOutcome::Cancelled => Status::Pending,
        };

        Self {
            id,
            grade: outcome.grade(),
            outcome: outcome.kind(),
            failure_kind: outcome.failure_kind(),
            status,
        }
    }
}
