//! Integration tests for the taskforge CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Get a Command for the taskforge binary, isolated from user settings
fn taskforge(project: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("taskforge"));
    cmd.env("XDG_CONFIG_HOME", project.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("TASKFORGE_FILE")
        .env_remove("RUST_LOG")
        .arg("--project")
        .arg(project);
    cmd
}

fn read_tasks(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn add(project: &Path, title: &str) {
    taskforge(project)
        .args(["add", "--title", title])
        .assert()
        .success();
}

/// Point the LLM client at a command that does not exist.
fn without_llm(project: &Path) {
    let dir = project.join(".taskforge");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("settings.json"),
        r#"{"llm": {"command": "taskforge-test-missing-cli", "maxRetries": 0}}"#,
    )
    .unwrap();
}

#[test]
fn test_help() {
    Command::new(cargo::cargo_bin!("taskforge"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dependency validation"));
}

#[test]
fn test_version() {
    Command::new(cargo::cargo_bin!("taskforge"))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_init_creates_settings_and_task_file() {
    let temp = TempDir::new().unwrap();

    taskforge(temp.path())
        .args(["init", "--name", "Demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Project initialized"));

    assert!(temp.path().join(".taskforge/settings.json").exists());
    let file = read_tasks(&temp.path().join("tasks.json"));
    assert_eq!(file["meta"]["projectName"], "Demo");
    assert_eq!(file["tasks"].as_array().unwrap().len(), 0);
}

#[test]
fn test_add_list_and_set_status() {
    let temp = TempDir::new().unwrap();
    add(temp.path(), "Set up repository");

    taskforge(temp.path())
        .args(["add", "--title", "Write parser", "--priority", "high"])
        .args(["--dependencies", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added task 2"));

    taskforge(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Set up repository"))
        .stdout(predicate::str::contains("Write parser"))
        .stdout(predicate::str::contains("0/2 tasks done"));

    taskforge(temp.path())
        .args(["set-status", "1", "done"])
        .assert()
        .success();

    let file = read_tasks(&temp.path().join("tasks.json"));
    assert_eq!(file["tasks"][0]["status"], "done");
    assert_eq!(file["tasks"][1]["dependencies"][0], 1);

    taskforge(temp.path())
        .arg("next")
        .assert()
        .success()
        .stdout(predicate::str::contains("Task 2:"));
}

#[test]
fn test_add_without_title_is_a_validation_error() {
    let temp = TempDir::new().unwrap();

    taskforge(temp.path())
        .args(["add", "--description", "no title"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("title is required"));
}

#[test]
fn test_show_unknown_task_is_not_found() {
    let temp = TempDir::new().unwrap();
    add(temp.path(), "Only task");

    taskforge(temp.path())
        .args(["show", "99"])
        .assert()
        .code(3);
}

#[test]
fn test_invalid_transition_exit_code() {
    let temp = TempDir::new().unwrap();
    add(temp.path(), "Finished");
    taskforge(temp.path())
        .args(["set-status", "1", "done"])
        .assert()
        .success();

    taskforge(temp.path())
        .args(["set-status", "1", "in-progress"])
        .assert()
        .code(4);
}

#[test]
fn test_remove_task_with_dependents_is_rejected() {
    let temp = TempDir::new().unwrap();
    add(temp.path(), "Base");
    taskforge(temp.path())
        .args(["add", "--title", "Depends on base", "--dependencies", "1"])
        .assert()
        .success();

    taskforge(temp.path())
        .args(["remove", "1"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("2"));

    let file = read_tasks(&temp.path().join("tasks.json"));
    assert_eq!(file["tasks"].as_array().unwrap().len(), 2);
}

#[test]
fn test_circular_dependency_is_rejected() {
    let temp = TempDir::new().unwrap();
    add(temp.path(), "A");
    taskforge(temp.path())
        .args(["add", "--title", "B", "--dependencies", "1"])
        .assert()
        .success();

    taskforge(temp.path())
        .args(["add-dependency", "1", "2"])
        .assert()
        .code(5);
}

#[test]
fn test_subtasks_complete_parent() {
    let temp = TempDir::new().unwrap();
    add(temp.path(), "Parent");
    for title in ["First", "Second"] {
        taskforge(temp.path())
            .args(["add-subtask", "--parent", "1", "--title", title])
            .assert()
            .success();
    }

    taskforge(temp.path())
        .args(["set-status", "1.1,1.2", "done"])
        .assert()
        .success();

    let file = read_tasks(&temp.path().join("tasks.json"));
    assert_eq!(file["tasks"][0]["status"], "done");
    assert_eq!(file["tasks"][0]["subtasks"][1]["status"], "done");
}

#[test]
fn test_alternate_file_flag() {
    let temp = TempDir::new().unwrap();
    let other = temp.path().join("other.json");

    taskforge(temp.path())
        .arg("--file")
        .arg(&other)
        .args(["add", "--title", "Elsewhere"])
        .assert()
        .success();

    assert!(other.exists());
    assert!(!temp.path().join("tasks.json").exists());
}

#[test]
fn test_malformed_task_file_aborts() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("tasks.json"), "{ not json").unwrap();

    taskforge(temp.path())
        .args(["add", "--title", "Lost?"])
        .assert()
        .code(6);

    assert_eq!(
        fs::read_to_string(temp.path().join("tasks.json")).unwrap(),
        "{ not json"
    );
}

#[test]
fn test_validate_and_fix_dependencies() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("tasks.json"),
        r#"{"tasks": [{"id": 1, "title": "A", "dependencies": [1, 7, 7]}]}"#,
    )
    .unwrap();

    taskforge(temp.path())
        .arg("validate-dependencies")
        .assert()
        .success()
        .stdout(predicate::str::contains("missing_dependency"));

    taskforge(temp.path())
        .arg("fix-dependencies")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 3 invalid dependencies"));

    let file = read_tasks(&temp.path().join("tasks.json"));
    assert_eq!(file["tasks"][0]["dependencies"].as_array().unwrap().len(), 0);
}

#[test]
fn test_generate_writes_task_files() {
    let temp = TempDir::new().unwrap();
    add(temp.path(), "Render me");

    taskforge(temp.path())
        .args(["generate", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 1 task files"));

    let body = fs::read_to_string(temp.path().join("tasks/task_001.txt")).unwrap();
    assert!(body.contains("# Title: Render me"));
}

#[test]
fn test_expand_without_llm_falls_back_to_placeholders() {
    let temp = TempDir::new().unwrap();
    without_llm(temp.path());
    add(temp.path(), "Big task");

    taskforge(temp.path())
        .args(["expand", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("placeholder subtasks"));

    let file = read_tasks(&temp.path().join("tasks.json"));
    let subtasks = file["tasks"][0]["subtasks"].as_array().unwrap();
    assert_eq!(subtasks.len(), 3);
    assert!(subtasks[0]["title"]
        .as_str()
        .unwrap()
        .starts_with("Placeholder subtask 1"));
}

#[test]
fn test_forced_expand_without_llm_keeps_existing_subtasks() {
    let temp = TempDir::new().unwrap();
    without_llm(temp.path());
    add(temp.path(), "Parent");
    taskforge(temp.path())
        .args(["add-subtask", "--parent", "1", "--title", "Keep me"])
        .assert()
        .success();
    taskforge(temp.path())
        .args(["add", "--title", "Follow-up", "--dependencies", "1.1"])
        .assert()
        .success();

    taskforge(temp.path())
        .args(["expand", "1", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kept the existing 1 subtasks"));

    let file = read_tasks(&temp.path().join("tasks.json"));
    assert_eq!(file["tasks"][0]["subtasks"][0]["title"], "Keep me");
    assert_eq!(file["tasks"][1]["dependencies"][0], "1.1");
}

#[test]
fn test_parse_prd_without_llm_fails_with_actionable_message() {
    let temp = TempDir::new().unwrap();
    without_llm(temp.path());
    let prd = temp.path().join("prd.md");
    fs::write(&prd, "# Product\n\nBuild a task tracker.\n").unwrap();

    taskforge(temp.path())
        .arg("parse-prd")
        .arg(&prd)
        .assert()
        .code(7)
        .stderr(predicate::str::contains("not installed or not in PATH"));

    assert!(!temp.path().join("tasks.json").exists());
}

#[test]
fn test_parse_prd_missing_file_is_not_found() {
    let temp = TempDir::new().unwrap();
    without_llm(temp.path());

    taskforge(temp.path())
        .args(["parse-prd", "does-not-exist.md"])
        .assert()
        .code(3);
}
