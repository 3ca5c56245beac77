//! Scratch space and per-attempt work areas.
//!
//! A [`ScratchRoot`] is a private directory owned by one run. Every fetch
//! attempt allocates its own [`WorkArea`] inside it; the work area removes
//! itself when released or dropped, so cleanup also happens on error and
//! panic paths.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::models::TaskId;

/// Longest task-id fragment used in a work area name.
const MAX_NAME_FRAGMENT: usize = 40;

/// Run-scoped namespace for work areas.
#[derive(Debug)]
pub struct ScratchRoot {
    dir: TempDir,
    live: Arc<AtomicUsize>,
}

impl ScratchRoot {
    /// Create a fresh run directory under `base`.
    pub fn create(base: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new().prefix("run-").tempdir_in(base)?;
        debug!("Scratch root: {}", dir.path().display());

        Ok(Self {
            dir,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocate an empty, uniquely named directory for one attempt at `task`.
    ///
    /// The name is derived from the task id and a random suffix, never from
    /// the source reference, so two tasks pointing at the same repository
    /// never collide.
    pub fn allocate(&self, task: &TaskId) -> std::io::Result<WorkArea> {
        let prefix = format!("task-{}-", sanitize(task.as_str()));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(self.dir.path())?;
        self.live.fetch_add(1, Ordering::SeqCst);
        debug!("Allocated work area {} for task {}", dir.path().display(), task);

        Ok(WorkArea {
            task: task.clone(),
            dir: Some(dir),
            live: Arc::clone(&self.live),
        })
    }

    /// Number of work areas allocated and not yet released.
    pub fn live_work_areas(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Entries still present on disk in the run directory.
    pub fn leftovers(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(self.dir.path())? {
            paths.push(entry?.path());
        }
        paths.sort();
        Ok(paths)
    }
}

/// Exclusively owned directory for a single fetch attempt.
#[derive(Debug)]
pub struct WorkArea {
    task: TaskId,
    dir: Option<TempDir>,
    live: Arc<AtomicUsize>,
}

impl WorkArea {
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// Remove the directory now and report whether that worked.
    pub fn release(mut self) -> std::io::Result<()> {
        self.close()
    }

    fn close(&mut self) -> std::io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        let path = dir.path().to_path_buf();
        let result = match dir.close() {
            // libgit2 may already have removed the directory after a failed clone.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        };
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!("Released work area {} for task {}", path.display(), self.task);
        result
    }
}

impl Drop for WorkArea {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to remove work area for task {}: {}", self.task, e);
        }
    }
}

/// Keep only characters that are safe in a directory name.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_FRAGMENT)
        .collect();

    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("student-42"), "student-42");
        assert_eq!(sanitize("../../etc"), "______etc");
        assert_eq!(sanitize(""), "anon");
        assert_eq!(sanitize(&"x".repeat(100)).len(), MAX_NAME_FRAGMENT);
    }

    #[test]
    fn test_allocate_is_unique_per_attempt() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::create(base.path()).unwrap();
        let id = TaskId::from("same");

        let first = scratch.allocate(&id).unwrap();
        let second = scratch.allocate(&id).unwrap();

        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(scratch.path()));
        assert_eq!(scratch.live_work_areas(), 2);
    }

    #[test]
    fn test_release_and_drop_remove_directory() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::create(base.path()).unwrap();

        let area = scratch.allocate(&TaskId::from("a")).unwrap();
        std::fs::write(area.path().join("main.py"), "print(1)\n").unwrap();
        let released = area.path().to_path_buf();
        area.release().unwrap();
        assert!(!released.exists());

        {
            let area = scratch.allocate(&TaskId::from("b")).unwrap();
            std::fs::create_dir_all(area.path().join("pkg/sub")).unwrap();
            std::fs::write(area.path().join("pkg/sub/x.py"), "x = 1\n").unwrap();
        }

        assert_eq!(scratch.live_work_areas(), 0);
        assert!(scratch.leftovers().unwrap().is_empty());
    }

    #[test]
    fn test_scratch_root_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let run_dir = {
            let scratch = ScratchRoot::create(base.path()).unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!run_dir.exists());
    }
}
