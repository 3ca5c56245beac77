//! File scanner for discovering and filtering source files.
//!
//! This module walks a work area and returns the files that take part in
//! grading, in a stable order, skipping hidden entries, configured
//! excludes and symlinks.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["py"])
    pub extensions: Vec<String>,
    /// Directory or file names to exclude (e.g., ["venv", "__pycache__"])
    pub excludes: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string()],
            excludes: vec![
                ".git",
                "target",
                "node_modules",
                "vendor",
                "dist",
                "build",
                "__pycache__",
                ".venv",
                "venv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl From<&crate::config::ScoringConfig> for ScanConfig {
    fn from(config: &crate::config::ScoringConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
        }
    }
}

/// Scanned file information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Relative path from the scanned root, with `/` separators
    pub path: String,
    /// Absolute path on disk
    pub absolute: PathBuf,
    /// File extension (without dot, lowercase)
    pub extension: String,
}

/// File scanner for discovering source files.
pub struct FileScanner {
    config: ScanConfig,
    root: PathBuf,
}

impl FileScanner {
    /// Create a new file scanner.
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self { config, root }
    }

    /// Scan for all matching files, sorted by path.
    pub fn scan(&self) -> Vec<ScannedFile> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded(entry));

        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let rel_path = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            let rel = rel_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            files.push(ScannedFile {
                path: rel,
                absolute: entry.path().to_path_buf(),
                extension: extension_of(entry.path()),
            });
        }

        files
    }

    /// Check if a file has one of the configured extensions.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        !ext.is_empty()
            && self
                .config
                .extensions
                .iter()
                .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }

    /// Check if an entry matches exclusion patterns.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();

        // Hidden files and directories, including .git
        if name.starts_with('.') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern.as_str())
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}
