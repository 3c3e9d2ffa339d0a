//! Per-task file rendering.
//!
//! Writes one file per task (`task_001.md` or `task_001.txt`) into an output
//! directory. Existing files are kept unless `overwrite` is set. The store is
//! never modified.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::{IntoTaskforgeError, Result};
use crate::task::{DependencyRef, Task, TaskId, TaskStatus};

/// Output format for generated task files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    #[default]
    Markdown,
    Text,
}

impl FileFormat {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Markdown => "md",
            FileFormat::Text => "txt",
        }
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(FileFormat::Markdown),
            "text" | "txt" => Ok(FileFormat::Text),
            other => Err(format!(
                "Unknown format '{other}'. Valid options: markdown, text"
            )),
        }
    }
}

/// Options for [`generate_task_files`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub format: FileFormat,
    /// Only render tasks with this status
    pub status: Option<TaskStatus>,
    pub overwrite: bool,
}

/// Files written and skipped by [`generate_task_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedFiles {
    pub written: Vec<PathBuf>,
    /// Already present and not overwritten
    pub skipped: Vec<PathBuf>,
}

/// File name for a task: `task_007.md`.
#[must_use]
pub fn task_file_name(id: TaskId, format: FileFormat) -> String {
    format!("task_{id:03}.{}", format.extension())
}

fn dependency_list(deps: &[DependencyRef], parent: Option<TaskId>) -> String {
    if deps.is_empty() {
        return "None".to_string();
    }
    deps.iter()
        .map(|d| match d.resolve(parent) {
            Some(id) => id.to_string(),
            None => d.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render one task as markdown.
#[must_use]
pub fn render_markdown(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task {}: {}\n", task.id, task.title);
    let _ = writeln!(out, "- **Status:** {}", task.status);
    let _ = writeln!(out, "- **Priority:** {}", task.priority);
    let _ = writeln!(
        out,
        "- **Dependencies:** {}",
        dependency_list(&task.dependencies, None)
    );
    if let Some(complexity) = &task.complexity {
        let _ = writeln!(out, "- **Complexity:** {}/10", complexity.score);
    }

    if !task.description.is_empty() {
        let _ = write!(out, "\n## Description\n\n{}\n", task.description);
    }
    if let Some(details) = &task.details {
        let _ = write!(out, "\n## Details\n\n{details}\n");
    }
    if let Some(strategy) = &task.test_strategy {
        let _ = write!(out, "\n## Test Strategy\n\n{strategy}\n");
    }

    if !task.subtasks.is_empty() {
        out.push_str("\n## Subtasks\n");
        for sub in &task.subtasks {
            let _ = write!(
                out,
                "\n### {}.{} {} [{}]\n\n",
                task.id, sub.id, sub.title, sub.status
            );
            let _ = writeln!(
                out,
                "- **Dependencies:** {}",
                dependency_list(&sub.dependencies, Some(task.id))
            );
            if !sub.description.is_empty() {
                let _ = write!(out, "\n{}\n", sub.description);
            }
            if let Some(details) = &sub.details {
                let _ = write!(out, "\n{details}\n");
            }
        }
    }
    out
}

/// Render one task as plain text.
#[must_use]
pub fn render_text(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task ID: {}", task.id);
    let _ = writeln!(out, "# Title: {}", task.title);
    let _ = writeln!(out, "# Status: {}", task.status);
    let _ = writeln!(
        out,
        "# Dependencies: {}",
        dependency_list(&task.dependencies, None)
    );
    let _ = writeln!(out, "# Priority: {}", task.priority);
    let _ = writeln!(out, "# Description: {}", task.description);
    let _ = writeln!(out, "# Details:\n{}\n", task.details.as_deref().unwrap_or(""));
    let _ = writeln!(
        out,
        "# Test Strategy:\n{}",
        task.test_strategy.as_deref().unwrap_or("")
    );

    if !task.subtasks.is_empty() {
        out.push_str("\n# Subtasks:\n");
        for sub in &task.subtasks {
            let _ = writeln!(out, "## {}. {} [{}]", sub.id, sub.title, sub.status);
            let _ = writeln!(
                out,
                "### Dependencies: {}",
                dependency_list(&sub.dependencies, Some(task.id))
            );
            let _ = writeln!(out, "### Description: {}", sub.description);
            let _ = writeln!(out, "### Details:\n{}\n", sub.details.as_deref().unwrap_or(""));
        }
    }
    out
}

/// Write one file per task into `output_dir`.
///
/// # Errors
///
/// Returns [`crate::TaskforgeError::Persistence`] if the directory or a file
/// cannot be written.
pub fn generate_task_files(
    tasks: &[Task],
    output_dir: &Path,
    options: &GenerateOptions,
) -> Result<GeneratedFiles> {
    fs::create_dir_all(output_dir).into_persistence(output_dir)?;

    let mut result = GeneratedFiles::default();
    for task in tasks {
        if options.status.as_ref().is_some_and(|s| *s != task.status) {
            continue;
        }
        let path = output_dir.join(task_file_name(task.id, options.format));
        if path.exists() && !options.overwrite {
            debug!("Keeping existing {}", path.display());
            result.skipped.push(path);
            continue;
        }
        let body = match options.format {
            FileFormat::Markdown => render_markdown(task),
            FileFormat::Text => render_text(task),
        };
        fs::write(&path, body).into_persistence(&path)?;
        result.written.push(path);
    }

    info!(
        "Generated {} task files in {} ({} skipped)",
        result.written.len(),
        output_dir.display(),
        result.skipped.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Subtask;
    use tempfile::TempDir;

    fn sample() -> Vec<Task> {
        let mut first = Task::new(1, "Scaffold");
        first.description = "Create the repo".into();
        first.status = TaskStatus::Done;
        let mut second = Task::new(12, "Parser");
        second.dependencies = vec![DependencyRef::Task(1)];
        second.details = Some("Use a hand-written lexer".into());
        let mut sub = Subtask::new(2, "Tokens");
        sub.dependencies = vec![DependencyRef::Sibling(1)];
        second.subtasks = vec![Subtask::new(1, "Grammar"), sub];
        vec![first, second]
    }

    #[test]
    fn test_file_names_are_zero_padded() {
        assert_eq!(task_file_name(7, FileFormat::Markdown), "task_007.md");
        assert_eq!(task_file_name(1234, FileFormat::Text), "task_1234.txt");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("MD".parse::<FileFormat>(), Ok(FileFormat::Markdown));
        assert_eq!("text".parse::<FileFormat>(), Ok(FileFormat::Text));
        assert!("pdf".parse::<FileFormat>().is_err());
    }

    #[test]
    fn test_markdown_resolves_sibling_dependencies() {
        let rendered = render_markdown(&sample()[1]);
        assert!(rendered.starts_with("# Task 12: Parser"));
        assert!(rendered.contains("- **Dependencies:** 1\n"));
        assert!(rendered.contains("### 12.2 Tokens [pending]"));
        assert!(rendered.contains("- **Dependencies:** 12.1"));
        assert!(rendered.contains("## Details\n\nUse a hand-written lexer"));
    }

    #[test]
    fn test_text_format() {
        let rendered = render_text(&sample()[0]);
        assert!(rendered.starts_with("# Task ID: 1\n# Title: Scaffold\n# Status: done"));
        assert!(rendered.contains("# Dependencies: None"));
    }

    #[test]
    fn test_generate_filters_and_skips_existing() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("tasks");
        let tasks = sample();

        let first = generate_task_files(
            &tasks,
            &out,
            &GenerateOptions {
                status: Some(TaskStatus::Pending),
                ..GenerateOptions::default()
            },
        )
        .unwrap();
        assert_eq!(first.written, vec![out.join("task_012.md")]);

        fs::write(out.join("task_012.md"), "edited by hand").unwrap();
        let second = generate_task_files(&tasks, &out, &GenerateOptions::default()).unwrap();
        assert_eq!(second.written, vec![out.join("task_001.md")]);
        assert_eq!(second.skipped, vec![out.join("task_012.md")]);
        assert_eq!(fs::read_to_string(out.join("task_012.md")).unwrap(), "edited by hand");

        let third = generate_task_files(
            &tasks,
            &out,
            &GenerateOptions {
                overwrite: true,
                ..GenerateOptions::default()
            },
        )
        .unwrap();
        assert_eq!(third.written.len(), 2);
        assert!(fs::read_to_string(out.join("task_012.md"))
            .unwrap()
            .contains("Parser"));
    }
}
