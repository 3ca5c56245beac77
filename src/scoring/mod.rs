//! Code-size grading of a source tree.
//!
//! Every source file is measured in logical lines and classified as
//! conforming (at most `threshold` lines) or oversized. The grade is the
//! share of logical lines that live in conforming files:
//!
//! ```text
//! grade = 100 * conforming_lines / total_lines      (2 decimals)
//! ```
//!
//! Files that cannot be parsed are counted as oversized but carry no weight,
//! so one malformed file does not sink an otherwise gradable submission.

pub mod lines;

use crate::error::ScoreError;
use crate::models::{SourceFile, TreeScore};
use crate::scanner::{FileScanner, ScanConfig, ScannedFile};
use std::path::Path;
use tracing::{debug, warn};

/// Default logical-line limit for a conforming file.
pub const DEFAULT_THRESHOLD: usize = 150;

/// Grades a directory tree.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    scan: ScanConfig,
    threshold: usize,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(ScanConfig::default(), DEFAULT_THRESHOLD)
    }
}

impl From<&crate::config::ScoringConfig> for QualityScorer {
    fn from(config: &crate::config::ScoringConfig) -> Self {
        Self::new(ScanConfig::from(config), config.threshold)
    }
}

impl QualityScorer {
    pub fn new(scan: ScanConfig, threshold: usize) -> Self {
        Self { scan, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Measure every source file under `root`, in path order.
    pub fn measure(&self, root: &Path) -> Vec<SourceFile> {
        let scanner = FileScanner::new(root.to_path_buf(), self.scan.clone());

        scanner
            .scan()
            .into_iter()
            .map(|file| match self.measure_file(&file) {
                Ok(measured) => measured,
                Err(e) => {
                    warn!("{}", e);
                    SourceFile {
                        path: file.path,
                        line_count: 0,
                        oversized: true,
                        parsed: false,
                    }
                }
            })
            .collect()
    }

    /// Grade the tree under `root`.
    pub fn score(&self, root: &Path) -> Result<TreeScore, ScoreError> {
        let files = self.measure(root);
        let score = aggregate(&files)?;

        debug!(
            "Scored {}: {} files, {} lines, grade {}",
            root.display(),
            score.files_considered,
            score.total_lines,
            score.grade
        );

        Ok(score)
    }

    fn measure_file(&self, file: &ScannedFile) -> Result<SourceFile, ScoreError> {
        let bytes = std::fs::read(&file.absolute).map_err(|e| ScoreError::ParseError {
            file: file.path.clone().into(),
            reason: e.to_string(),
        })?;

        let syntax = lines::syntax_for(&file.extension);
        let line_count =
            lines::count_bytes(&bytes, &syntax).map_err(|e| ScoreError::ParseError {
                file: file.path.clone().into(),
                reason: e.to_string(),
            })?;

        Ok(SourceFile {
            path: file.path.clone(),
            line_count,
            oversized: line_count > self.threshold,
            parsed: true,
        })
    }
}

/// Combine per-file measurements into a grade.
pub fn aggregate(files: &[SourceFile]) -> Result<TreeScore, ScoreError> {
    let mut total_lines = 0;
    let mut conforming_lines = 0;
    let mut files_oversized = 0;
    let mut files_unparsed = 0;

    for file in files {
        if !file.parsed {
            files_unparsed += 1;
            files_oversized += 1;
            continue;
        }

        total_lines += file.line_count;
        if file.oversized {
            files_oversized += 1;
        } else {
            conforming_lines += file.line_count;
        }
    }

    if total_lines == 0 {
        return Err(ScoreError::NoSourceFiles {
            scanned: files.len(),
            unparsed: files_unparsed,
        });
    }

    let ratio = conforming_lines as f64 / total_lines as f64;

    Ok(TreeScore {
        grade: round2(ratio * 100.0),
        files_considered: files.len(),
        files_oversized,
        files_unparsed,
        total_lines,
        conforming_lines,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn python_file(lines: usize) -> String {
        let mut src = String::from("# generated\n\n");
        for i in 0..lines {
            src.push_str(&format!("value_{} = {}\n", i, i));
        }
        src
    }

    fn write(root: &Path, rel: &str, content: impl AsRef<[u8]>) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_reference_grade() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", python_file(100));
        write(dir.path(), "b.py", python_file(200));
        write(dir.path(), "c.py", python_file(50));

        let score = QualityScorer::default().score(dir.path()).unwrap();

        assert_eq!(score.total_lines, 350);
        assert_eq!(score.conforming_lines, 150);
        assert_eq!(score.files_considered, 3);
        assert_eq!(score.files_oversized, 1);
        assert_eq!(score.grade, 42.86);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "edge.py", python_file(150));
        write(dir.path(), "over.py", python_file(151));

        let files = QualityScorer::default().measure(dir.path());
        assert!(!files[0].oversized);
        assert!(files[1].oversized);
    }

    #[test]
    fn test_comment_only_file_has_no_weight() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.py", python_file(200));
        write(dir.path(), "notes.py", "# just notes\n\n# more notes\n");

        let score = QualityScorer::default().score(dir.path()).unwrap();
        assert_eq!(score.total_lines, 200);
        assert_eq!(score.conforming_lines, 0);
        assert_eq!(score.grade, 0.0);
        assert_eq!(score.files_considered, 2);
    }

    #[test]
    fn test_no_source_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "# hello\n");

        let err = QualityScorer::default().score(dir.path()).unwrap_err();
        assert_eq!(
            err,
            ScoreError::NoSourceFiles {
                scanned: 0,
                unparsed: 0
            }
        );
    }

    #[test]
    fn test_only_comments_is_not_gradable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "empty.py", "\n\n# nothing\n");

        let err = QualityScorer::default().score(dir.path()).unwrap_err();
        assert!(matches!(err, ScoreError::NoSourceFiles { scanned: 1, .. }));
    }

    #[test]
    fn test_unparseable_file_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.py", python_file(10));
        write(dir.path(), "bad.py", [0xffu8, 0xfe, 0xfd]);

        let score = QualityScorer::default().score(dir.path()).unwrap();
        assert_eq!(score.grade, 100.0);
        assert_eq!(score.total_lines, 10);
        assert_eq!(score.files_unparsed, 1);
        assert_eq!(score.files_oversized, 1);
        assert_eq!(score.files_considered, 2);
    }

    #[test]
    fn test_all_files_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.py", [0xffu8, 0xfe, 0xfd]);
        write(dir.path(), "worse.py", "\"\"\"never closed\nx = 1\n");

        let err = QualityScorer::default().score(dir.path()).unwrap_err();
        assert_eq!(
            err,
            ScoreError::NoSourceFiles {
                scanned: 2,
                unparsed: 2
            }
        );
    }

    #[test]
    fn test_fixture_grade_is_deterministic() {
        let scorer = QualityScorer::default();
        let first = scorer.score(&fixture("submission")).unwrap();
        let second = scorer.score(&fixture("submission")).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.grade.to_bits(), second.grade.to_bits());
        assert_eq!(first.files_considered, 3);
        assert!(first.grade > 0.0 && first.grade <= 100.0);
    }

    #[test]
    fn test_aggregate_rounding() {
        let files = vec![
            SourceFile {
                path: "a.py".to_string(),
                line_count: 1,
                oversized: false,
                parsed: true,
            },
            SourceFile {
                path: "b.py".to_string(),
                line_count: 2,
                oversized: true,
                parsed: true,
            },
        ];

        let score = aggregate(&files).unwrap();
        assert_eq!(score.grade, 33.33);
    }
}
