//! CLI integration tests using assert_cmd.
//!
//! Sessions run against the offline `mock` provider, which grades answers by
//! keyword overlap with the key concepts.

use std::path::Path;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG: &str = r#"
default_provider = "offline"
sessions_dir = "sessions"
retry_delay_ms = 1

[providers.offline]
type = "mock"
"#;

const LESSON: &str = r#"
[lesson]
id = "python-oop"
title = "Python OOP"

[[outcomes]]
id = "classes"
description = "Define classes"
key_concepts = ["class keyword", "__init__"]

[[outcomes]]
id = "methods"
description = "Write methods"
key_concepts = ["self"]
"#;

fn mastery() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("mastery").unwrap()
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("mastery.toml"), CONFIG).unwrap();
    std::fs::write(dir.path().join("lesson.toml"), LESSON).unwrap();
    dir
}

fn in_dir(dir: &Path) -> Command {
    let mut cmd = mastery();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

/// Start a session and return its id.
fn start(dir: &Path) -> String {
    let output = in_dir(dir)
        .args(["start", "--lesson", "lesson.toml"])
        .output()
        .unwrap();
    assert!(output.status.success(), "start failed: {output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("[classes] Question: Explain in your own words: Define classes"));
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Session: "))
        .expect("session id in output")
        .trim()
        .to_string()
}

#[test]
fn full_session_across_invocations() {
    let dir = workspace();
    let id = start(dir.path());

    in_dir(dir.path())
        .args(["answer", "--session", &id, "--text"])
        .arg("You use the class keyword and define __init__")
        .assert()
        .success()
        .stdout(predicate::str::contains("You covered: class keyword, __init__."))
        .stdout(predicate::str::contains("Outcome mastered"));

    in_dir(dir.path())
        .args(["continue", "--session", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("[methods] Question:"));

    // A wrong answer is re-taught and followed by a fresh question
    in_dir(dir.path())
        .args(["answer", "--session", &id, "--text", "No idea"])
        .assert()
        .success()
        .stdout(predicate::str::contains("DEFINITION: Write methods."))
        .stdout(predicate::str::contains("[methods] Question:"));

    in_dir(dir.path())
        .args(["answer", "--session", &id, "--text", "self is the instance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Outcome mastered"));

    in_dir(dir.path())
        .args(["continue", "--session", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("All outcomes mastered!"))
        .stdout(predicate::str::contains("2/2 outcomes mastered"));

    in_dir(dir.path())
        .args(["progress", "--session", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("mastered"))
        .stdout(predicate::str::contains("phase: completed"));

    in_dir(dir.path())
        .args(["export", "--session", &id, "--output", "transcript.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 3 turns"));

    let transcript: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("transcript.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(transcript["turns"].as_array().unwrap().len(), 3);
    assert_eq!(transcript["turns"][1]["route"], "reteach");
    assert_eq!(transcript["summary"]["completed"], true);
}

#[test]
fn partial_answer_gets_follow_up_as_json() {
    let dir = workspace();
    let id = start(dir.path());

    let output = in_dir(dir.path())
        .args(["answer", "--json", "--session", &id, "--text", "the class keyword"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let event: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(event["event"], "feedback");
    assert_eq!(event["mastered"], false);
    assert!(event["next_question"]
        .as_str()
        .unwrap()
        .contains("(mention __init__)"));
}

#[test]
fn contract_violations_report_error_codes() {
    let dir = workspace();
    let id = start(dir.path());

    in_dir(dir.path())
        .args(["continue", "--session", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error [input_contract]"));

    in_dir(dir.path())
        .args([
            "answer",
            "--session",
            "00000000-0000-0000-0000-000000000000",
            "--text",
            "hi",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error [invalid_session]"));
}

#[test]
fn sessions_lists_started_sessions() {
    let dir = workspace();
    let id = start(dir.path());

    in_dir(dir.path())
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains(id))
        .stdout(predicate::str::contains("0/2 mastered"));
}

#[test]
fn tutor_runs_to_completion_on_stdin() {
    let dir = workspace();

    in_dir(dir.path())
        .args(["tutor", "--lesson", "lesson.toml"])
        .write_stdin("the class keyword and __init__\nself\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("[methods] Question:"))
        .stdout(predicate::str::contains("All outcomes mastered!"));
}

#[test]
fn tutor_quit_keeps_session() {
    let dir = workspace();

    in_dir(dir.path())
        .args(["tutor", "--lesson", "lesson.toml"])
        .write_stdin("quit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Session saved"));

    in_dir(dir.path())
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("answer_pending"));
}

#[test]
fn tutor_quit_with_json_prints_only_events() {
    let dir = workspace();

    let output = in_dir(dir.path())
        .args(["tutor", "--json", "--lesson", "lesson.toml"])
        .write_stdin("quit\n")
        .output()
        .unwrap();
    assert!(output.status.success(), "tutor failed: {output:?}");

    let stdout = String::from_utf8(output.stdout).unwrap();
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 1);
    assert!(!stdout.contains("Session saved"));
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "message": {"role": "assistant", "content": content},
        "model": "llama3",
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tutor_waits_for_input_when_next_question_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("Evaluate a learner's answer"))
        .respond_with(chat_reply(
            r#"{"score": 1.0, "concepts_addressed": ["class keyword", "__init__"], "feedback": "Spot on."}"#,
        ))
        .with_priority(1)
        .mount(&server)
        .await;
    // only the first question is served
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply("What does a class statement create?"))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .with_priority(3)
        .mount(&server)
        .await;

    let dir = workspace();
    let config = format!(
        r#"
default_provider = "local"
default_model = "llama3"
sessions_dir = "sessions"
max_retries = 0
retry_delay_ms = 1

[providers.local]
type = "ollama"
base_url = "{}"
"#,
        server.uri()
    );
    std::fs::write(dir.path().join("mastery.toml"), config).unwrap();

    // answer, then one retry on an empty line, then quit
    let root = dir.path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        in_dir(&root)
            .args(["tutor", "--lesson", "lesson.toml"])
            .write_stdin("the class keyword and __init__\n\nquit\n")
            .timeout(Duration::from_secs(30))
            .assert()
            .success()
            .stdout(predicate::str::contains("Outcome mastered"))
            .stdout(predicate::str::contains("Press Enter to retry"))
            .stdout(predicate::str::contains(
                "Session saved. Resume with `mastery continue --session",
            ))
            .stderr(predicate::str::contains("Error [generation_failed]").count(2));
    })
    .await
    .unwrap();

    // first question, evaluation, two failed attempts at the next question
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[test]
fn start_without_configured_provider_fails() {
    let dir = workspace();

    in_dir(dir.path())
        .args(["start", "--lesson", "lesson.toml", "--provider", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("'missing' is not configured"));
}

#[test]
fn validate_lesson_with_warnings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lesson.toml");
    std::fs::write(
        &path,
        r#"
[lesson]
id = "warn"
title = "Warnings"

[[outcomes]]
id = "bare"
description = "An outcome without concepts"

[[outcomes]]
id = "retired"
description = "Old material"
active = false
"#,
    )
    .unwrap();

    mastery()
        .args(["validate", "--lesson"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Lesson: Warnings (1 outcomes)"))
        .stdout(predicate::str::contains("Inactive outcomes skipped: retired"))
        .stdout(predicate::str::contains("[bare] WARNING: no key concepts listed"));
}

#[test]
fn validate_directory() {
    let dir = workspace();

    mastery()
        .args(["validate", "--lesson"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Python OOP"))
        .stdout(predicate::str::contains("All lessons valid"));
}

#[test]
fn validate_nonexistent_file() {
    mastery()
        .args(["validate", "--lesson", "nonexistent.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    mastery()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created mastery.toml"))
        .stdout(predicate::str::contains("Created lessons/example.toml"));

    assert!(dir.path().join("mastery.toml").exists());

    // The generated lesson is valid as-is
    mastery()
        .current_dir(dir.path())
        .args(["validate", "--lesson", "lessons/example.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 outcomes"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    mastery()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    mastery()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn list_models_for_offline_provider() {
    let dir = workspace();

    in_dir(dir.path())
        .args(["list-models", "--provider", "offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mock-model"));
}

#[test]
fn help_output() {
    mastery()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Adaptive mastery-based tutor"));
}

#[test]
fn version_output() {
    mastery()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mastery"));
}
