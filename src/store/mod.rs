//! JSON record stores.
//!
//! The upstream [`RecordStore`] lists submissions and their lifecycle status;
//! only `ready` submissions are graded. The downstream [`GradeSheet`] holds
//! one grade record per submission. Both are rewritten atomically, so a
//! crash mid-write never leaves a truncated file behind.

use crate::models::{GradeRecord, RunReport, Status, Task, TaskId, TaskOutcome};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One submission in the upstream store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: TaskId,
    /// Repository URL or path.
    pub repo: String,
    pub status: Status,
    /// Columns this tool does not interpret, carried through unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Submission records backed by a JSON file.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: Vec<SubmissionRecord>,
}

impl RecordStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let records = read_json_or_default(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn records(&self) -> &[SubmissionRecord] {
        &self.records
    }

    /// Tasks for every submission that is ready to be graded.
    pub fn ready_tasks(&self) -> Vec<Task> {
        self.records
            .iter()
            .filter(|r| r.status == Status::Ready)
            .map(|r| Task {
                id: r.id.clone(),
                source_reference: r.repo.clone(),
            })
            .collect()
    }

    /// Advance submission statuses from a run's outcomes.
    ///
    /// Graded submissions become `consumed`, failed ones `error`. Cancelled
    /// ones stay `ready` so the next run picks them up. Returns the number
    /// of records changed.
    pub fn apply_report(&mut self, report: &RunReport) -> usize {
        let mut changed = 0;

        for record in self.records.iter_mut().filter(|r| r.status == Status::Ready) {
            let next = match report.outcomes.get(&record.id) {
                Some(TaskOutcome::Success(_)) => Status::Consumed,
                Some(TaskOutcome::Failure { .. }) => Status::Error,
                Some(TaskOutcome::Cancelled) | None => continue,
            };
            record.status = next;
            changed += 1;
        }

        debug!("Updated {} submission status(es)", changed);
        changed
    }

    /// Write the store back to disk.
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.records)?;
        info!("Submission statuses saved to {}", self.path.display());
        Ok(())
    }
}

/// Downstream grade records, one per submission id.
#[derive(Debug)]
pub struct GradeSheet {
    path: PathBuf,
    records: BTreeMap<TaskId, GradeRecord>,
}

impl GradeSheet {
    /// Load the sheet at `path`. A missing file is an empty sheet.
    pub fn load(path: &Path) -> Result<Self> {
        let rows: Vec<GradeRecord> = read_json_or_default(path)?;
        let records = rows.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn get(&self, id: &TaskId) -> Option<&GradeRecord> {
        self.records.get(id)
    }

    /// Insert or replace the grade of every task in `report`.
    pub fn merge(&mut self, report: &RunReport) {
        for record in report.grade_records() {
            self.records.insert(record.id.clone(), record);
        }
    }

    pub fn save(&self) -> Result<()> {
        let rows: Vec<&GradeRecord> = self.records.values().collect();
        write_json_atomic(&self.path, &rows)?;
        info!("{} grade(s) saved to {}", rows.len(), self.path.display());
        Ok(())
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        debug!("{} does not exist, starting empty", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write `value` as pretty JSON via a temp file in the target directory.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;

    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
