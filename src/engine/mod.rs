//! Concurrent grading engine.
//!
//! The [`Dispatcher`] runs a batch of tasks through a [`TaskRunner`] with a
//! bounded number of parallel executions, per-task and overall time limits
//! and cooperative cancellation. [`AnalysisWorker`] is the production runner:
//! fetch into a work area, score, release.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::{Dispatcher, PoolOptions};
pub use worker::{AnalysisWorker, TaskRunner};

#[cfg(test)]
pub(crate) mod test_support {
    use super::TaskRunner;
    use crate::error::FetchError;
    use crate::models::{Task, TaskOutcome};
    use crate::repo::{ScratchRoot, SourceFetcher, WorkArea};
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    /// Runner backed by a closure.
    pub struct FnRunner<F>(pub F);

    impl<F> TaskRunner for FnRunner<F>
    where
        F: Fn(&Task, &CancellationToken) -> TaskOutcome + Send + Sync + 'static,
    {
        fn run(&self, task: &Task, cancel: &CancellationToken) -> TaskOutcome {
            (self.0)(task, cancel)
        }
    }

    /// Sleep in small steps. Returns false if `cancel` fired first.
    pub fn wait(duration: Duration, cancel: &CancellationToken) -> bool {
        let until = Instant::now() + duration;
        while Instant::now() < until {
            if cancel.is_cancelled() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        !cancel.is_cancelled()
    }

    /// Fetcher that writes fixed files into the work area after a delay.
    ///
    /// The source reference is ignored, except that a reference starting with
    /// `missing:` fails with `NotFound` and one starting with `slow:` never
    /// finishes until cancelled.
    pub struct StubFetcher {
        pub files: Vec<(&'static str, String)>,
        pub delay: Duration,
    }

    impl StubFetcher {
        pub fn python(lines: usize) -> Self {
            let mut src = String::new();
            for i in 0..lines {
                src.push_str(&format!("v{} = {}\n", i, i));
            }
            Self {
                files: vec![("main.py", src)],
                delay: Duration::ZERO,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl SourceFetcher for StubFetcher {
        fn fetch(
            &self,
            task: &Task,
            scratch: &ScratchRoot,
            cancel: &CancellationToken,
        ) -> Result<WorkArea, FetchError> {
            let area = scratch.allocate(&task.id)?;

            if task.source_reference.starts_with("missing:") {
                return Err(FetchError::NotFound {
                    reference: task.source_reference.clone(),
                    reason: "no such repository".to_string(),
                });
            }

            let delay = if task.source_reference.starts_with("slow:") {
                Duration::from_secs(3600)
            } else {
                self.delay
            };
            if !wait(delay, cancel) {
                return Err(FetchError::Cancelled);
            }

            for (path, content) in &self.files {
                let full = area.path().join(path);
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(full, content)?;
            }
            Ok(area)
        }
    }
}
