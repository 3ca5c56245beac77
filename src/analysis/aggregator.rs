//! Outcome aggregation.
//!
//! The aggregator accepts outcomes in any order and produces a report keyed
//! by task id, so the report's content never depends on scheduling. It
//! enforces one outcome per task: duplicates and unknown ids are engine
//! bugs and fail fast, missing ids are reconciled against the task list.

use crate::error::DispatchError;
use crate::models::{RunReport, RunStatus, RunSummary, Task, TaskId, TaskOutcome};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Collects one outcome per task.
#[derive(Debug)]
pub struct ResultAggregator {
    expected: BTreeSet<TaskId>,
    outcomes: BTreeMap<TaskId, TaskOutcome>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl ResultAggregator {
    /// Start aggregating for `tasks`. Rejects duplicate task ids.
    pub fn new(tasks: &[Task]) -> Result<Self, DispatchError> {
        let mut expected = BTreeSet::new();
        for task in tasks {
            if !expected.insert(task.id.clone()) {
                return Err(DispatchError::DuplicateTask(task.id.clone()));
            }
        }

        Ok(Self {
            expected,
            outcomes: BTreeMap::new(),
            started_at: Utc::now(),
            clock: Instant::now(),
        })
    }

    /// Record the outcome of one task.
    pub fn record(&mut self, id: TaskId, outcome: TaskOutcome) -> Result<(), DispatchError> {
        if !self.expected.contains(&id) {
            return Err(DispatchError::UnknownTask(id));
        }
        if self.outcomes.contains_key(&id) {
            return Err(DispatchError::DuplicateOutcome(id));
        }
        self.outcomes.insert(id, outcome);
        Ok(())
    }

    /// Close the run. Tasks in `unresolved` were never dispatched and are
    /// marked cancelled; any other task without an outcome is an error.
    pub fn finish(
        mut self,
        status: RunStatus,
        unresolved: Vec<TaskId>,
    ) -> Result<RunReport, DispatchError> {
        for id in &unresolved {
            self.record(id.clone(), TaskOutcome::Cancelled)?;
        }

        if let Some(missing) = self
            .expected
            .iter()
            .find(|id| !self.outcomes.contains_key(*id))
        {
            return Err(DispatchError::MissingOutcome(missing.clone()));
        }

        let mut unresolved = unresolved;
        unresolved.sort();

        Ok(RunReport {
            started_at: self.started_at,
            duration_seconds: self.clock.elapsed().as_secs_f64(),
            status,
            summary: RunSummary::from_outcomes(self.outcomes.values()),
            outcomes: self.outcomes,
            unresolved,
        })
    }

    /// Drain a stream of outcomes for a run that dispatched every task.
    pub async fn collect<S>(tasks: &[Task], stream: S) -> Result<RunReport, DispatchError>
    where
        S: Stream<Item = (TaskId, TaskOutcome)>,
    {
        let mut aggregator = Self::new(tasks)?;
        futures::pin_mut!(stream);

        while let Some((id, outcome)) = stream.next().await {
            aggregator.record(id, outcome)?;
        }

        aggregator.finish(RunStatus::Completed, Vec::new())
    }
}
