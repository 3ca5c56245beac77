//! Run report generation.
//!
//! This module renders a [`RunReport`] as Markdown or JSON.

use crate::models::{RunReport, RunStatus, TaskOutcome};
use anyhow::Result;
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# RepoGrader Report\n\n");

    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_outcomes_section(report));
    output.push_str(&generate_unresolved_section(report));

    output.push_str("---\n\n");
    output.push_str("*Report generated by RepoGrader*\n");

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &RunReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Started:** {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Duration:** {:.1}s\n", report.duration_seconds));
    section.push_str(&format!("- **Status:** {}\n", report.status));
    if report.status != RunStatus::Completed {
        section.push_str(&format!(
            "- **Not started:** {} task(s)\n",
            report.unresolved.len()
        ));
    }
    section.push('\n');

    section
}

/// Generate the summary section.
fn generate_summary_section(report: &RunReport) -> String {
    let summary = &report.summary;
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Graded | Failed | Cancelled | **Total** |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** |\n\n",
        summary.succeeded, summary.failed, summary.cancelled, summary.total
    ));

    let grades: Vec<f64> = report.outcomes.values().filter_map(TaskOutcome::grade).collect();
    if !grades.is_empty() {
        let mean = grades.iter().sum::<f64>() / grades.len() as f64;
        let min = grades.iter().copied().fold(f64::INFINITY, f64::min);
        let max = grades.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        section.push_str("### Grades\n\n");
        section.push_str("| Mean | Min | Max |\n");
        section.push_str("|:---:|:---:|:---:|\n");
        section.push_str(&format!("| {:.2} | {:.2} | {:.2} |\n\n", mean, min, max));
    }

    if !summary.by_failure.is_empty() {
        section.push_str("### Failures by Kind\n\n");
        section.push_str("| Kind | Count |\n");
        section.push_str("|:---|:---:|\n");

        let mut kinds: Vec<_> = summary.by_failure.iter().collect();
        kinds.sort_by_key(|(_, count)| std::cmp::Reverse(*count));

        for (kind, count) in kinds {
            section.push_str(&format!("| {} | {} |\n", kind, count));
        }
        section.push('\n');
    }

    section
}

/// Generate the per-task table.
fn generate_outcomes_section(report: &RunReport) -> String {
    let mut section = String::new();

    section.push_str("## Outcomes\n\n");

    if report.outcomes.is_empty() {
        section.push_str("No tasks were submitted.\n\n");
        return section;
    }

    section.push_str("| Task | Outcome | Grade | Files | Oversized | Lines | Detail |\n");
    section.push_str("|:---|:---|:---:|:---:|:---:|:---:|:---|\n");

    for (id, outcome) in &report.outcomes {
        let row = match outcome {
            TaskOutcome::Success(score) => format!(
                "| `{}` | success | {:.2} | {} | {} | {} | |\n",
                id, score.grade, score.files_considered, score.files_oversized, score.total_lines
            ),
            TaskOutcome::Failure { kind, message } => format!(
                "| `{}` | {} | - | - | - | - | {} |\n",
                id,
                kind,
                escape_cell(message)
            ),
            TaskOutcome::Cancelled => format!("| `{}` | cancelled | - | - | - | - | |\n", id),
        };
        section.push_str(&row);
    }
    section.push('\n');

    section
}

/// List tasks that never started.
fn generate_unresolved_section(report: &RunReport) -> String {
    if report.unresolved.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Not Started\n\n");
    section.push_str("These tasks were never dispatched and can be retried:\n\n");
    for id in &report.unresolved {
        section.push_str(&format!("- `{}`\n", id));
    }
    section.push('\n');

    section
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write the report to a file in the requested format.
pub fn write_report(report: &RunReport, path: &Path, format: crate::cli::OutputFormat) -> Result<()> {
    let content = match format {
        crate::cli::OutputFormat::Markdown => generate_markdown_report(report),
        crate::cli::OutputFormat::Json => generate_json_report(report)?,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::models::{FailureKind, RunSummary, ScoreResult, TaskId, TreeScore};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn create_test_report() -> RunReport {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            TaskId::from("alice"),
            TaskOutcome::Success(ScoreResult::new(
                TaskId::from("alice"),
                TreeScore {
                    grade: 42.86,
                    files_considered: 3,
                    files_oversized: 1,
                    files_unparsed: 0,
                    total_lines: 350,
                    conforming_lines: 150,
                },
            )),
        );
        outcomes.insert(
            TaskId::from("bob"),
            TaskOutcome::failure(FailureKind::NotFound, "Repository not found: x | y"),
        );
        outcomes.insert(TaskId::from("carol"), TaskOutcome::Cancelled);

        RunReport {
            started_at: Utc::now(),
            duration_seconds: 12.5,
            status: RunStatus::Cancelled,
            summary: RunSummary::from_outcomes(outcomes.values()),
            outcomes,
            unresolved: vec![TaskId::from("carol")],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# RepoGrader Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("- **Status:** cancelled"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("| 1 | 1 | 1 | **3** |"));
        assert!(markdown.contains("| `alice` | success | 42.86 | 3 | 1 | 350 | |"));
        assert!(markdown.contains("| not_found | 1 |"));
        assert!(markdown.contains("x \\| y"));
        assert!(markdown.contains("## Not Started"));
        assert!(markdown.contains("- `carol`"));
    }

    #[test]
    fn test_empty_report() {
        let report = RunReport {
            started_at: Utc::now(),
            duration_seconds: 0.0,
            status: RunStatus::Completed,
            outcomes: BTreeMap::new(),
            unresolved: Vec::new(),
            summary: RunSummary::default(),
        };
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("No tasks were submitted."));
        assert!(!markdown.contains("### Grades"));
        assert!(!markdown.contains("## Not Started"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"status\": \"cancelled\""));
        assert!(json.contains("\"outcome\": \"success\""));
        assert!(json.contains("\"kind\": \"not_found\""));

        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcomes, report.outcomes);
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");

        write_report(&create_test_report(), &path, OutputFormat::Json).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with('{'));
    }
}
