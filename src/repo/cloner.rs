//! Git repository fetching.
//!
//! This module clones submitted repositories into per-attempt work areas
//! using the git2 library. Clones are bounded in time and can be abandoned
//! cooperatively: libgit2 polls our transfer callbacks, and a callback that
//! returns `false` aborts the transfer.

use crate::error::FetchError;
use crate::models::Task;
use crate::repo::workarea::{ScratchRoot, WorkArea};
use git2::{ErrorCode, FetchOptions, Progress, RemoteCallbacks};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Turns a source reference into a populated work area.
pub trait SourceFetcher: Send + Sync {
    /// Materialize `task.source_reference` into a new work area under `scratch`.
    ///
    /// On error no directory is left behind.
    fn fetch(
        &self,
        task: &Task,
        scratch: &ScratchRoot,
        cancel: &CancellationToken,
    ) -> Result<WorkArea, FetchError>;
}

/// Options for cloning a repository.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Branch to checkout (None for default branch).
    pub branch: Option<String>,
    /// Depth for shallow clone of remote repositories (None for full clone).
    pub depth: Option<i32>,
    /// Upper bound on the whole clone.
    pub timeout: Duration,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            branch: None,
            depth: Some(1),
            timeout: Duration::from_secs(300),
        }
    }
}

impl From<&crate::config::FetchConfig> for CloneOptions {
    fn from(config: &crate::config::FetchConfig) -> Self {
        Self {
            branch: config.branch.clone(),
            depth: (config.depth > 0).then_some(config.depth),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Fetcher backed by libgit2.
#[derive(Debug, Clone, Default)]
pub struct GitFetcher {
    options: CloneOptions,
}

impl GitFetcher {
    pub fn new(options: CloneOptions) -> Self {
        Self { options }
    }
}

impl SourceFetcher for GitFetcher {
    fn fetch(
        &self,
        task: &Task,
        scratch: &ScratchRoot,
        cancel: &CancellationToken,
    ) -> Result<WorkArea, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let area = scratch.allocate(&task.id)?;
        // Dropping `area` on the error path removes any partial clone.
        clone_into(&task.source_reference, area.path(), &self.options, cancel)?;
        Ok(area)
    }
}

/// Clone `url` into the existing, empty directory `path`.
pub fn clone_into(
    url: &str,
    path: &Path,
    options: &CloneOptions,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    info!("Cloning repository: {}", url);
    let started = Instant::now();
    let deadline = started + options.timeout;

    let mut callbacks = RemoteCallbacks::new();

    let token = cancel.clone();
    callbacks.transfer_progress(move |progress: Progress<'_>| {
        if progress.total_objects() > 0 && progress.received_objects() == progress.total_objects() {
            debug!("Received {} objects", progress.total_objects());
        }
        !token.is_cancelled() && Instant::now() < deadline
    });

    let token = cancel.clone();
    callbacks.sideband_progress(move |_| !token.is_cancelled() && Instant::now() < deadline);

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);

    // libgit2's local transport does not do shallow fetches.
    if is_remote(url) {
        if let Some(depth) = options.depth {
            fetch_opts.depth(depth);
        }
    }

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_opts);

    if let Some(ref branch) = options.branch {
        builder.branch(branch);
    }

    match builder.clone(url, path) {
        Ok(_repo) => {
            info!(
                "Cloned {} in {:.1}s",
                url,
                started.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            let abort = if cancel.is_cancelled() {
                Some(Abort::Cancelled)
            } else if Instant::now() >= deadline {
                Some(Abort::Deadline(options.timeout))
            } else {
                None
            };
            Err(classify_error(url, &e, abort))
        }
    }
}

/// Why our callbacks stopped a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Abort {
    Cancelled,
    Deadline(Duration),
}

/// Map a libgit2 error onto the fetch error taxonomy.
fn classify_error(reference: &str, err: &git2::Error, abort: Option<Abort>) -> FetchError {
    match abort {
        Some(Abort::Cancelled) => return FetchError::Cancelled,
        Some(Abort::Deadline(after)) => {
            return FetchError::Timeout {
                reference: reference.to_string(),
                after,
            }
        }
        None => {}
    }

    let reason = err.message().to_string();
    let lower = reason.to_lowercase();
    let reference = reference.to_string();

    match err.code() {
        ErrorCode::Auth => return FetchError::Auth { reference, reason },
        ErrorCode::NotFound => return FetchError::NotFound { reference, reason },
        _ => {}
    }

    if lower.contains("404")
        || lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("could not find repository")
    {
        FetchError::NotFound { reference, reason }
    } else if lower.contains("401") || lower.contains("403") || lower.contains("authentication") {
        FetchError::Auth { reference, reason }
    } else {
        FetchError::Unreachable { reference, reason }
    }
}

/// Whether `url` goes over the network (as opposed to a local path).
pub fn is_remote(url: &str) -> bool {
    ["http://", "https://", "ssh://", "git://", "git@"]
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::init_repo;
    use git2::ErrorClass;

    fn scratch() -> (tempfile::TempDir, ScratchRoot) {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::create(base.path()).unwrap();
        (base, scratch)
    }

    #[test]
    fn test_clone_options_default() {
        let opts = CloneOptions::default();
        assert!(opts.branch.is_none());
        assert_eq!(opts.depth, Some(1));
        assert_eq!(opts.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://github.com/rust-lang/rust"));
        assert!(is_remote("git@github.com:rust-lang/rust.git"));
        assert!(is_remote("ssh://git@host/repo"));
        assert!(!is_remote("/srv/submissions/repo"));
        assert!(!is_remote("file:///srv/submissions/repo"));
    }

    #[test]
    fn test_fetch_local_repository() {
        let origin = tempfile::tempdir().unwrap();
        init_repo(origin.path(), &[("main.py", "print('hi')\n"), ("pkg/util.py", "x = 1\n")]);
        let (_base, scratch) = scratch();

        let task = Task::new("s1", origin.path().to_string_lossy());
        let area = GitFetcher::default()
            .fetch(&task, &scratch, &CancellationToken::new())
            .unwrap();

        assert!(area.path().join("main.py").is_file());
        assert!(area.path().join("pkg/util.py").is_file());
        assert!(area.path().starts_with(scratch.path()));

        area.release().unwrap();
        assert!(scratch.leftovers().unwrap().is_empty());
    }

    #[test]
    fn test_fetch_does_not_touch_origin() {
        let origin = tempfile::tempdir().unwrap();
        init_repo(origin.path(), &[("main.py", "print('hi')\n")]);
        let (_base, scratch) = scratch();

        let task = Task::new("s1", origin.path().to_string_lossy());
        let area = GitFetcher::default()
            .fetch(&task, &scratch, &CancellationToken::new())
            .unwrap();
        drop(area);

        assert!(origin.path().join("main.py").is_file());
        assert!(origin.path().join(".git").is_dir());
    }

    #[test]
    fn test_failed_fetch_leaves_nothing_behind() {
        let missing = tempfile::tempdir().unwrap();
        let (_base, scratch) = scratch();

        let task = Task::new("s2", missing.path().join("nope").to_string_lossy());
        let err = GitFetcher::default()
            .fetch(&task, &scratch, &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::NotFound { .. } | FetchError::Unreachable { .. }
        ));
        assert!(scratch.leftovers().unwrap().is_empty());
        assert_eq!(scratch.live_work_areas(), 0);
    }

    #[test]
    fn test_missing_branch_leaves_nothing_behind() {
        let origin = tempfile::tempdir().unwrap();
        init_repo(origin.path(), &[("main.py", "print('hi')\n")]);
        let (_base, scratch) = scratch();

        let fetcher = GitFetcher::new(CloneOptions {
            branch: Some("no-such-branch".to_string()),
            ..CloneOptions::default()
        });
        let task = Task::new("s3", origin.path().to_string_lossy());

        assert!(fetcher
            .fetch(&task, &scratch, &CancellationToken::new())
            .is_err());
        assert!(scratch.leftovers().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_before_fetch() {
        let (_base, scratch) = scratch();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = Task::new("s4", "https://example.invalid/repo.git");
        let err = GitFetcher::default()
            .fetch(&task, &scratch, &cancel)
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(scratch.leftovers().unwrap().is_empty());
    }

    #[test]
    fn test_classify_error() {
        let url = "https://github.com/o/r.git";

        let err = git2::Error::new(ErrorCode::Auth, ErrorClass::Http, "authentication required");
        assert!(matches!(classify_error(url, &err, None), FetchError::Auth { .. }));

        let err = git2::Error::new(
            ErrorCode::GenericError,
            ErrorClass::Http,
            "unexpected http status code: 404",
        );
        assert!(matches!(classify_error(url, &err, None), FetchError::NotFound { .. }));

        let err = git2::Error::new(
            ErrorCode::GenericError,
            ErrorClass::Net,
            "failed to resolve address for github.com",
        );
        assert!(matches!(classify_error(url, &err, None), FetchError::Unreachable { .. }));

        let err = git2::Error::new(ErrorCode::User, ErrorClass::Callback, "aborted by user");
        assert!(matches!(
            classify_error(url, &err, Some(Abort::Cancelled)),
            FetchError::Cancelled
        ));
        assert!(matches!(
            classify_error(url, &err, Some(Abort::Deadline(Duration::from_secs(1)))),
            FetchError::Timeout { .. }
        ));
    }
}
