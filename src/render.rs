//! Terminal output for the CLI.
//!
//! Every function returns the rendered text; `main` decides where it goes.

use colored::{ColoredString, Colorize};
use std::fmt::Write as _;

use taskforge::actions::{ComplexityReport, Expansion, GeneratedFiles, RemovedSubtask};
use taskforge::graph::{IssueKind, RepairSummary, ValidationReport};
use taskforge::store::dependencies_satisfied;
use taskforge::task::{status_of, DependencyRef, EntityId, Subtask, Task, TaskId, TaskStatus};
use taskforge::Priority;

const TITLE_WIDTH: usize = 48;

pub fn status_label(status: &TaskStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        TaskStatus::Pending => text.yellow(),
        TaskStatus::InProgress => text.blue(),
        TaskStatus::Review => text.magenta(),
        TaskStatus::Done => text.green(),
        TaskStatus::Deferred => text.dimmed(),
        TaskStatus::Cancelled => text.red(),
        TaskStatus::Custom(_) => text.cyan(),
    }
}

pub fn priority_label(priority: Priority) -> ColoredString {
    match priority {
        Priority::High => priority.as_str().red().bold(),
        Priority::Medium => priority.as_str().yellow(),
        Priority::Low => priority.as_str().dimmed(),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

/// Dependencies with a check mark for those already done.
fn dependency_cells(deps: &[DependencyRef], parent: Option<TaskId>, tasks: &[Task]) -> String {
    if deps.is_empty() {
        return "-".to_string();
    }
    deps.iter()
        .map(|dep| match dep.resolve(parent) {
            Some(id) => match status_of(tasks, id) {
                Some(TaskStatus::Done) => format!("{} {}", "✓".green(), id),
                Some(_) => id.to_string(),
                None => format!("{}", id.to_string().red()),
            },
            None => dep.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// The task table shown by `list`.
pub fn task_list(tasks: &[Task], all: &[Task], with_subtasks: bool) -> String {
    let mut out = String::new();
    if tasks.is_empty() {
        let _ = writeln!(out, "{} No tasks found", "Note:".yellow());
        return out;
    }

    let _ = writeln!(
        out,
        "{:<6} {:<12} {:<8} {:<18} {}",
        "ID".bold(),
        "Status".bold(),
        "Priority".bold(),
        "Dependencies".bold(),
        "Title".bold()
    );
    for task in tasks {
        let _ = writeln!(
            out,
            "{:<6} {:<12} {:<8} {:<18} {}",
            task.id,
            status_label(&task.status),
            priority_label(task.priority),
            dependency_cells(&task.dependencies, None, all),
            truncate(&task.title, TITLE_WIDTH)
        );
        if with_subtasks {
            for sub in &task.subtasks {
                let _ = writeln!(
                    out,
                    "  {:<4} {:<12} {:<8} {:<18} {}",
                    format!("{}.{}", task.id, sub.id).dimmed(),
                    status_label(&sub.status),
                    priority_label(sub.effective_priority(task)),
                    dependency_cells(&sub.dependencies, Some(task.id), all),
                    truncate(&sub.title, TITLE_WIDTH - 2)
                );
            }
        }
    }

    let done = all.iter().filter(|t| t.status == TaskStatus::Done).count();
    let percent = if all.is_empty() {
        0
    } else {
        done * 100 / all.len()
    };
    let _ = writeln!(
        out,
        "\n{} {done}/{} tasks done ({percent}%)",
        "Progress:".cyan(),
        all.len()
    );
    out
}

/// Full view of one task, used by `show`, `add`, `update` and `expand`.
pub fn task_detail(task: &Task, all: &[Task]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", format!("Task {}:", task.id).bold(), task.title.bold());
    let _ = writeln!(out, "   Status:       {}", status_label(&task.status));
    let _ = writeln!(out, "   Priority:     {}", priority_label(task.priority));
    let _ = writeln!(
        out,
        "   Dependencies: {}",
        dependency_cells(&task.dependencies, None, all)
    );
    if let Some(complexity) = &task.complexity {
        let _ = writeln!(
            out,
            "   Complexity:   {}/10 ({} subtasks recommended)",
            complexity.score, complexity.recommended_subtasks
        );
    }
    if !task.description.is_empty() {
        let _ = writeln!(out, "\n{}\n{}", "Description".cyan(), task.description);
    }
    if let Some(details) = &task.details {
        let _ = writeln!(out, "\n{}\n{details}", "Details".cyan());
    }
    if let Some(strategy) = &task.test_strategy {
        let _ = writeln!(out, "\n{}\n{strategy}", "Test strategy".cyan());
    }
    if !task.subtasks.is_empty() {
        let done = task
            .subtasks
            .iter()
            .filter(|s| s.status == TaskStatus::Done)
            .count();
        let _ = writeln!(
            out,
            "\n{} ({done}/{} done)",
            "Subtasks".cyan(),
            task.subtasks.len()
        );
        for sub in &task.subtasks {
            let _ = writeln!(
                out,
                "   {:<6} {:<12} {}",
                format!("{}.{}", task.id, sub.id),
                status_label(&sub.status),
                sub.title
            );
        }
    }
    out
}

pub fn subtask_detail(parent: &Task, sub: &Subtask, all: &[Task]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        format!("Subtask {}.{}:", parent.id, sub.id).bold(),
        sub.title.bold()
    );
    let _ = writeln!(out, "   Parent:       {} {}", parent.id, parent.title);
    let _ = writeln!(out, "   Status:       {}", status_label(&sub.status));
    let _ = writeln!(
        out,
        "   Priority:     {}",
        priority_label(sub.effective_priority(parent))
    );
    let _ = writeln!(
        out,
        "   Dependencies: {}",
        dependency_cells(&sub.dependencies, Some(parent.id), all)
    );
    if !sub.description.is_empty() {
        let _ = writeln!(out, "\n{}\n{}", "Description".cyan(), sub.description);
    }
    if let Some(details) = &sub.details {
        let _ = writeln!(out, "\n{}\n{details}", "Details".cyan());
    }
    out
}

pub fn next_task(next: Option<&Task>, all: &[Task]) -> String {
    match next {
        Some(task) => {
            let mut out = format!("{} Next task to work on\n\n", "→".cyan().bold());
            out.push_str(&task_detail(task, all));
            let _ = writeln!(
                out,
                "\nStart it with: taskforge set-status {} in-progress",
                task.id
            );
            out
        }
        None => {
            let blocked = all
                .iter()
                .filter(|t| t.status == TaskStatus::Pending && !dependencies_satisfied(all, t))
                .count();
            if blocked > 0 {
                format!(
                    "{} No task is ready; {blocked} pending tasks are waiting on dependencies\n",
                    "Note:".yellow()
                )
            } else {
                format!("{} No pending tasks\n", "Note:".yellow())
            }
        }
    }
}

pub fn validation_report(report: &ValidationReport) -> String {
    let mut out = String::new();
    if report.valid {
        let _ = writeln!(out, "{} No dependency issues found", "OK".green().bold());
        return out;
    }

    let _ = writeln!(
        out,
        "{} {} dependency issues found",
        "Warning:".yellow().bold(),
        report.issues.len()
    );
    for kind in [
        IssueKind::MissingDependency,
        IssueKind::SelfDependency,
        IssueKind::CircularDependency,
    ] {
        let count = report.count(kind);
        if count > 0 {
            let _ = writeln!(out, "   {kind}: {count}");
        }
    }
    out.push('\n');
    for issue in &report.issues {
        let _ = writeln!(out, "   {} {}: {}", "•".red(), issue.entity_id, issue.message);
    }
    if report.count(IssueKind::CircularDependency) > 0 {
        let _ = writeln!(
            out,
            "\nCycles are not removed automatically; break them with remove-dependency"
        );
    } else {
        let _ = writeln!(out, "\nRun fix-dependencies to remove invalid references");
    }
    out
}

pub fn repair_summary(summary: &RepairSummary, remaining: &ValidationReport) -> String {
    let mut out = String::new();
    if summary.total() == 0 {
        let _ = writeln!(out, "{} Nothing to fix", "OK".green().bold());
    } else {
        let _ = writeln!(
            out,
            "{} Removed {} invalid dependencies",
            "OK".green().bold(),
            summary.total()
        );
        let _ = writeln!(out, "   Duplicates:      {}", summary.duplicates_removed);
        let _ = writeln!(out, "   Missing targets: {}", summary.missing_removed);
        let _ = writeln!(out, "   Self references: {}", summary.self_references_removed);
    }
    let cycles = remaining.count(IssueKind::CircularDependency);
    if cycles > 0 {
        let _ = writeln!(
            out,
            "{} {cycles} circular dependencies remain and need manual resolution",
            "Warning:".yellow().bold()
        );
    }
    out
}

pub fn complexity_report(report: &ComplexityReport) -> String {
    let mut out = String::new();
    if report.entries.is_empty() {
        let _ = writeln!(out, "{} No open tasks to analyze", "Note:".yellow());
        return out;
    }

    let _ = writeln!(
        out,
        "{:<6} {:<6} {:<10} {}",
        "ID".bold(),
        "Score".bold(),
        "Subtasks".bold(),
        "Title".bold()
    );
    for entry in &report.entries {
        let score = format!("{}/10", entry.score);
        let score = if entry.needs_expansion {
            score.red().bold()
        } else {
            score.green()
        };
        let _ = writeln!(
            out,
            "{:<6} {:<6} {:<10} {}",
            entry.task_id,
            score,
            entry.recommended_subtasks,
            truncate(&entry.title, TITLE_WIDTH)
        );
    }

    let flagged: Vec<String> = report
        .needing_expansion()
        .map(|e| e.task_id.to_string())
        .collect();
    if flagged.is_empty() {
        let _ = writeln!(
            out,
            "\nNo task scores at or above the threshold of {}",
            report.threshold
        );
    } else {
        let _ = writeln!(
            out,
            "\n{} tasks at or above {}: {}",
            flagged.len(),
            report.threshold,
            flagged.join(", ")
        );
        let _ = writeln!(out, "Break them down with: taskforge expand <id>");
    }
    out
}

pub fn expansion(result: &Expansion, all: &[Task]) -> String {
    let mut out = String::new();
    if let Some(err) = &result.fallback {
        let outcome = if result.kept_existing {
            format!("kept the existing {} subtasks", result.task.subtasks.len())
        } else {
            "added placeholder subtasks instead".to_string()
        };
        let _ = writeln!(
            out,
            "{} Subtask generation failed ({err}); {outcome}",
            "Warning:".yellow().bold()
        );
    } else {
        let _ = writeln!(
            out,
            "{} Expanded task {} into {} subtasks",
            "OK".green().bold(),
            result.task.id,
            result.task.subtasks.len()
        );
    }
    out.push('\n');
    out.push_str(&task_detail(&result.task, all));
    out
}

pub fn removed_subtask(id: EntityId, removed: &RemovedSubtask) -> String {
    match removed {
        RemovedSubtask::Deleted(sub) => {
            format!("{} Removed subtask {id}: {}\n", "OK".green().bold(), sub.title)
        }
        RemovedSubtask::Converted(task) => format!(
            "{} Converted subtask {id} into task {}: {}\n",
            "OK".green().bold(),
            task.id,
            task.title
        ),
    }
}

pub fn generated_files(files: &GeneratedFiles) -> String {
    let mut out = format!(
        "{} Wrote {} task files\n",
        "OK".green().bold(),
        files.written.len()
    );
    if !files.skipped.is_empty() {
        let _ = writeln!(
            out,
            "   Kept {} existing files (use --overwrite to replace them)",
            files.skipped.len()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge::graph::validate;

    fn plain() {
        colored::control::set_override(false);
    }

    fn tasks() -> Vec<Task> {
        let mut first = Task::new(1, "Scaffold");
        first.status = TaskStatus::Done;
        let mut second = Task::new(2, "Parser");
        second.dependencies = vec![DependencyRef::Task(1)];
        second.subtasks = vec![Subtask::new(1, "Lexer")];
        vec![first, second]
    }

    #[test]
    fn test_list_shows_progress_and_subtasks() {
        plain();
        let all = tasks();
        let out = task_list(&all, &all, true);
        assert!(out.contains("Parser"));
        assert!(out.contains("2.1"));
        assert!(out.contains("✓ 1"));
        assert!(out.contains("1/2 tasks done (50%)"));
    }

    #[test]
    fn test_failed_forced_expand_mentions_kept_subtasks() {
        plain();
        let all = tasks();
        let result = Expansion {
            task: all[1].clone(),
            fallback: Some(taskforge::GeneratorError::Empty { what: "subtasks" }),
            kept_existing: true,
        };
        let out = expansion(&result, &all);
        assert!(out.contains("kept the existing 1 subtasks"));
        assert!(!out.contains("placeholder"));
    }

    #[test]
    fn test_empty_list() {
        plain();
        assert!(task_list(&[], &[], false).contains("No tasks found"));
    }

    #[test]
    fn test_truncate_long_titles() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long title", 10), "a very ...");
    }

    #[test]
    fn test_next_explains_blocked_tasks() {
        plain();
        let mut all = tasks();
        all[0].status = TaskStatus::InProgress;
        assert!(next_task(None, &all).contains("1 pending tasks are waiting"));
    }

    #[test]
    fn test_validation_report_lists_issues() {
        plain();
        let mut all = tasks();
        all[1].dependencies.push(DependencyRef::Task(9));
        let out = validation_report(&validate(&all));
        assert!(out.contains("missing_dependency: 1"));
        assert!(out.contains("fix-dependencies"));
    }
}
