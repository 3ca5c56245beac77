//! Single-task execution: fetch, score, release.

use crate::models::{ScoreResult, Task, TaskOutcome};
use crate::repo::{ScratchRoot, SourceFetcher};
use crate::scoring::QualityScorer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something that turns a task into exactly one outcome.
///
/// `run` is blocking and is executed on the blocking thread pool. It must
/// observe `cancel` at its checkpoints and must not leave anything behind
/// in the scratch namespace, whatever path it returns by.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: &Task, cancel: &CancellationToken) -> TaskOutcome;

    /// Scratch namespace to inspect for leftovers once a batch is over.
    fn scratch(&self) -> Option<&ScratchRoot> {
        None
    }
}

/// Production runner: fetch the repository, grade it, clean up.
pub struct AnalysisWorker {
    fetcher: Arc<dyn SourceFetcher>,
    scorer: QualityScorer,
    scratch: Arc<ScratchRoot>,
}

impl AnalysisWorker {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        scorer: QualityScorer,
        scratch: Arc<ScratchRoot>,
    ) -> Self {
        Self {
            fetcher,
            scorer,
            scratch,
        }
    }
}

impl TaskRunner for AnalysisWorker {
    fn run(&self, task: &Task, cancel: &CancellationToken) -> TaskOutcome {
        if cancel.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        let area = match self.fetcher.fetch(task, &self.scratch, cancel) {
            Ok(area) => area,
            Err(e) => {
                warn!("Task {}: {}", task.id, e);
                return e.into();
            }
        };

        if cancel.is_cancelled() {
            debug!("Task {} cancelled after fetch", task.id);
            if let Err(e) = area.release() {
                warn!("Task {}: failed to release work area: {}", task.id, e);
            }
            return TaskOutcome::Cancelled;
        }

        let outcome = match self.scorer.score(area.path()) {
            Ok(score) => {
                info!("Task {} graded {:.2}", task.id, score.grade);
                TaskOutcome::Success(ScoreResult::new(task.id.clone(), score))
            }
            Err(e) => {
                warn!("Task {}: {}", task.id, e);
                e.into()
            }
        };

        if let Err(e) = area.release() {
            warn!("Task {}: failed to release work area: {}", task.id, e);
        }

        outcome
    }

    fn scratch(&self) -> Option<&ScratchRoot> {
        Some(self.scratch.as_ref())
    }
}
