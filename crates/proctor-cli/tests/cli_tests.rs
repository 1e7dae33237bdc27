//! CLI integration tests using assert_cmd.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn proctor() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("proctor").unwrap()
}

fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(relative)
}

/// Writes an isolated config pointing storage into `dir`.
fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("proctor.toml");
    let storage = dir.join("data");
    std::fs::write(
        &path,
        format!(
            "storage_dir = {:?}\nwebcam = true\n{extra}",
            storage.display().to_string()
        ),
    )
    .unwrap();
    path
}

fn session_id_from(output: &Path) -> String {
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
    let session = json.get("session").unwrap_or(&json);
    session["id"].as_str().unwrap().to_string()
}

#[test]
fn validate_valid_exam() {
    proctor()
        .arg("validate")
        .arg("--exam")
        .arg(fixture("exams/algebra.toml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("7 questions"))
        .stdout(predicate::str::contains("All exams valid"));
}

#[test]
fn validate_directory() {
    proctor()
        .arg("validate")
        .arg("--exam")
        .arg(fixture("exams"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Algebra 101 Midterm"))
        .stdout(predicate::str::contains("Cell Biology Quiz"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(
        &path,
        r#"[exam]
id = "broken"
title = "Broken"

[[questions]]
id = "q1"
type = "multiple_choice"
prompt = "Only one option"
options = ["a"]

[[questions]]
id = "q1"
type = "short_answer"
prompt = "Duplicate id"
"#,
    )
    .unwrap();

    proctor()
        .arg("validate")
        .arg("--exam")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[q1] WARNING"))
        .stdout(predicate::str::contains("warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    proctor()
        .arg("validate")
        .arg("--exam")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    proctor()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created proctor.toml"))
        .stdout(predicate::str::contains("Created exams/example.toml"))
        .stdout(predicate::str::contains("Created scripts/example.toml"));

    assert!(dir.path().join("proctor.toml").exists());
    assert!(dir.path().join("exams/example.toml").exists());
    assert!(dir.path().join("scripts/example.toml").exists());

    proctor()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--exam")
        .arg("exams/example.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("All exams valid"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    proctor()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    proctor()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn run_submits_and_persists() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let output = dir.path().join("submission.json");

    proctor()
        .current_dir(dir.path())
        .arg("run")
        .arg("--exam")
        .arg(fixture("exams/algebra.toml"))
        .arg("--script")
        .arg(fixture("scripts/algebra.toml"))
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("submitted (user)"))
        .stdout(predicate::str::contains("4/7"))
        .stdout(predicate::str::contains("keyboard_shortcut"))
        .stdout(predicate::str::contains("tab_switch"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(json["session"]["submission"]["reason"], "user");
    assert_eq!(json["security_summary"]["total"], 2);

    proctor()
        .arg("sessions")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("algebra-101"))
        .stdout(predicate::str::contains("submitted"));

    let id = session_id_from(&output);
    proctor()
        .arg("inspect")
        .arg("--session")
        .arg(&id)
        .arg("--config")
        .arg(&config)
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("\"exam_target\": \"algebra-101\""));

    proctor()
        .arg("inspect")
        .arg("--session")
        .arg(&id)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Status:   submitted (user)"))
        .stdout(predicate::str::contains("x = 4"));
}

#[test]
fn run_without_submit_leaves_session_resumable() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let output = dir.path().join("session.json");

    proctor()
        .arg("run")
        .arg("--exam")
        .arg(fixture("exams/algebra.toml"))
        .arg("--script")
        .arg(fixture("scripts/algebra.toml"))
        .arg("--config")
        .arg(&config)
        .arg("--no-submit")
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("saved, resumable"));

    let id = session_id_from(&output);

    proctor()
        .arg("sessions")
        .arg("--exam-id")
        .arg("algebra-101")
        .arg("--incomplete")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("in progress"));

    // Resuming keeps the same session and carries the earlier answers.
    let script = dir.path().join("finish.toml");
    std::fs::write(
        &script,
        r#"[[steps]]
action = "answer"
question = "q4"
value = { type = "boolean", value = false }
"#,
    )
    .unwrap();

    proctor()
        .arg("run")
        .arg("--exam")
        .arg(fixture("exams/algebra.toml"))
        .arg("--script")
        .arg(&script)
        .arg("--config")
        .arg(&config)
        .arg("--resume")
        .arg("latest")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("5/7"))
        .stdout(predicate::str::contains("submitted (user)"));

    proctor()
        .arg("sessions")
        .arg("--exam-id")
        .arg("algebra-101")
        .arg("--incomplete")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions found"));
}

#[test]
fn run_rejects_mismatched_answer() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "security_level = \"high\"\n");
    let script = dir.path().join("bad.toml");
    std::fs::write(
        &script,
        r#"[[steps]]
action = "answer"
question = "q2"
value = { type = "text", value = "42" }
"#,
    )
    .unwrap();

    proctor()
        .arg("run")
        .arg("--exam")
        .arg(fixture("exams/algebra.toml"))
        .arg("--script")
        .arg(&script)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stderr(predicate::str::contains("Skipping answer for q2"))
        .stdout(predicate::str::contains("0/7"));
}

#[test]
fn inspect_unknown_session_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    proctor()
        .arg("inspect")
        .arg("--session")
        .arg("00000000-0000-0000-0000-000000000000")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn help_output() {
    proctor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exam session integrity engine"));
}

#[test]
fn version_output() {
    proctor()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("proctor"));
}
