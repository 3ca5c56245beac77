//! Bounded worker pool for a batch of tasks.
//!
//! The dispatcher keeps at most `max_parallel` executions alive. Each
//! execution runs the blocking [`TaskRunner`] on the blocking thread pool and
//! reports exactly one outcome over a channel. The permit that admitted an
//! execution is only returned once the runner has actually returned, so an
//! attempt abandoned after a timeout still counts against the bound until
//! its work area is gone.
//!
//! Cancellation is layered: the caller's token, a run token derived from it
//! (also cancelled by the overall time limit), and one token per attempt
//! (also cancelled by the per-task time limit).

use crate::analysis::ResultAggregator;
use crate::engine::worker::TaskRunner;
use crate::error::{DispatchError, PoolError};
use crate::models::{FailureKind, RunReport, RunStatus, Task, TaskId, TaskOutcome};
use indicatif::ProgressBar;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Limits applied to a batch run.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of tasks executing at once.
    pub max_parallel: usize,
    /// Wall-clock limit for one task, fetch and scoring included.
    pub per_task_timeout: Duration,
    /// Wall-clock limit for the whole batch.
    pub overall_timeout: Option<Duration>,
    /// How long to wait for abandoned attempts to clean up.
    pub cleanup_grace: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            per_task_timeout: Duration::from_secs(600),
            overall_timeout: None,
            cleanup_grace: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::PoolConfig> for PoolOptions {
    fn from(config: &crate::config::PoolConfig) -> Self {
        Self {
            max_parallel: config.max_parallel,
            per_task_timeout: Duration::from_secs(config.per_task_timeout_secs),
            overall_timeout: (config.overall_timeout_secs > 0)
                .then(|| Duration::from_secs(config.overall_timeout_secs)),
            cleanup_grace: Duration::from_secs(config.cleanup_grace_secs),
        }
    }
}

/// Runs batches of tasks through a [`TaskRunner`].
pub struct Dispatcher {
    runner: Arc<dyn TaskRunner>,
    options: PoolOptions,
    progress: Option<ProgressBar>,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn TaskRunner>, options: PoolOptions) -> Self {
        Self {
            runner,
            options,
            progress: None,
        }
    }

    /// Advance `progress` by one for every outcome.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run every task and return one outcome per task.
    ///
    /// Per-task problems are reported as outcomes. An `Err` means the engine
    /// itself misbehaved (duplicate ids, lost outcomes, leaked work areas).
    /// Work areas are only checked for leaks once every attempt has ended;
    /// attempts still blocked after the grace period are left to finish
    /// their own cleanup.
    pub async fn run_batch(
        &self,
        tasks: Vec<Task>,
        cancel: CancellationToken,
    ) -> Result<RunReport, DispatchError> {
        if self.options.max_parallel == 0 {
            return Err(DispatchError::InvalidParallelism);
        }

        let mut aggregator = ResultAggregator::new(&tasks)?;
        let run_token = cancel.child_token();
        // Stop in-flight work if we bail out early.
        let _guard = run_token.clone().drop_guard();

        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel));
        let tracker = TaskTracker::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<(TaskId, TaskOutcome)>();

        let mut queue: VecDeque<Task> = tasks.into();
        let mut in_flight = 0usize;
        let mut halt: Option<RunStatus> = None;

        info!(
            "Dispatching {} task(s), max {} in parallel",
            queue.len(),
            self.options.max_parallel
        );
        if let Some(pb) = &self.progress {
            pb.set_length(queue.len() as u64);
        }

        let overall = self.options.overall_timeout;
        let deadline = async move {
            match overall {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            let dispatching = halt.is_none() && !queue.is_empty();
            if !dispatching && in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;

                _ = run_token.cancelled(), if halt.is_none() => {
                    info!("Run cancelled, {} task(s) not started", queue.len());
                    halt = Some(RunStatus::Cancelled);
                }

                _ = &mut deadline, if halt.is_none() => {
                    warn!("Overall time limit reached, {} task(s) not started", queue.len());
                    halt = Some(RunStatus::TimedOut);
                    run_token.cancel();
                }

                Some((id, outcome)) = rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    if let Some(pb) = &self.progress {
                        pb.inc(1);
                        pb.set_message(id.to_string());
                    }
                    aggregator.record(id, outcome)?;
                }

                permit = Arc::clone(&semaphore).acquire_owned(), if dispatching => {
                    let Ok(permit) = permit else {
                        break;
                    };
                    let Some(task) = queue.pop_front() else {
                        continue;
                    };
                    debug!("Starting task {}", task.id);
                    in_flight += 1;
                    tracker.spawn(execute(
                        Arc::clone(&self.runner),
                        task,
                        run_token.clone(),
                        self.options.clone(),
                        tx.clone(),
                        permit,
                    ));
                }

                else => break,
            }
        }

        let unresolved: Vec<TaskId> = queue.into_iter().map(|task| task.id).collect();

        tracker.close();
        let drained = tokio::time::timeout(self.options.cleanup_grace, tracker.wait())
            .await
            .is_ok();

        if !drained {
            // Abandoned attempts keep the scratch root alive and remove their
            // own work areas once the blocking call returns.
            warn!(
                "{} attempt(s) still cleaning up after {:?}, not waiting for them",
                tracker.len(),
                self.options.cleanup_grace
            );
        } else if let Some(scratch) = self.runner.scratch() {
            let leftovers = scratch.leftovers()?;
            if !leftovers.is_empty() {
                for path in &leftovers {
                    error!("Work area left behind: {}", path.display());
                }
                return Err(DispatchError::WorkAreaLeak { paths: leftovers });
            }
        }

        let status = halt.unwrap_or(RunStatus::Completed);
        let report = aggregator.finish(status, unresolved)?;

        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!("{}", status));
        }
        info!(
            "Run {}: {} succeeded, {} failed, {} cancelled",
            report.status, report.summary.succeeded, report.summary.failed, report.summary.cancelled
        );

        Ok(report)
    }
}

/// Run one task under the pool's limits and send its outcome.
async fn execute(
    runner: Arc<dyn TaskRunner>,
    task: Task,
    run_token: CancellationToken,
    options: PoolOptions,
    tx: mpsc::UnboundedSender<(TaskId, TaskOutcome)>,
    permit: OwnedSemaphorePermit,
) {
    let id = task.id.clone();
    let attempt = run_token.child_token();
    let token = attempt.clone();
    let mut handle = tokio::task::spawn_blocking(move || runner.run(&task, &token));

    let interrupted = tokio::select! {
        biased;
        joined = &mut handle => {
            let _ = tx.send((id.clone(), joined_outcome(&id, joined)));
            drop(permit);
            return;
        }
        _ = run_token.cancelled() => PoolError::Cancelled,
        _ = tokio::time::sleep(options.per_task_timeout) => {
            PoolError::TaskTimeout(options.per_task_timeout)
        }
    };

    attempt.cancel();

    // A run-wide halt wins over a per-task timeout that fires alongside it.
    if run_token.is_cancelled() || interrupted == PoolError::Cancelled {
        match tokio::time::timeout(options.cleanup_grace, &mut handle).await {
            Ok(joined) => {
                let _ = tx.send((id.clone(), joined_outcome(&id, joined)));
                drop(permit);
                return;
            }
            Err(_) => {
                warn!("Task {} did not stop within the cleanup grace period", id);
                let _ = tx.send((id.clone(), PoolError::Cancelled.into()));
            }
        }
    } else {
        warn!("Task {}: {}", id, interrupted);
        let _ = tx.send((id.clone(), interrupted.into()));
    }

    settle(&id, handle).await;
    drop(permit);
}

/// Wait for an abandoned attempt to finish its cleanup.
async fn settle(id: &TaskId, handle: JoinHandle<TaskOutcome>) {
    match handle.await {
        Ok(late) => debug!("Abandoned task {} finished with {:?}", id, late.kind()),
        Err(e) => warn!("Abandoned task {} failed: {}", id, e),
    }
}

fn joined_outcome(id: &TaskId, joined: Result<TaskOutcome, JoinError>) -> TaskOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Worker for task {} panicked: {}", id, e);
            TaskOutcome::failure(FailureKind::Internal, format!("worker panicked: {}", e))
        }
    }
}
