//! Integration tests for the stepwise-cli commands.
//!
//! These tests exercise the same code paths as the binary. Agent runs use a
//! small shell script in place of the real agent executable, so they only
//! run on Unix.

use std::fs;
use std::path::{Path, PathBuf};

use stepwise_cli::commands;
use stepwise_core::joblog::{self, JobLogStatus, JobLogStep, JobStepStatus};
use stepwise_core::EngineConfig;
use tempfile::TempDir;

const WORKFLOW: &str = r#"
name: "Integration flow"
inputs:
  target:
    required: true
jobs:
  main:
    steps:
      - id: scan
        prompt: "Scan ${{ inputs.target }}"
      - id: fix
        prompt: "Fix ${{ steps.scan.outputs.result }}"
        resume_session: scan
"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write test file");
    path
}

#[cfg(unix)]
fn stub_agent(dir: &Path, body: &str) -> EngineConfig {
    use std::os::unix::fs::PermissionsExt;

    let script = write(
        dir,
        "agent.sh",
        &format!(
            "#!/bin/sh\necho \"$@\" >> \"$(dirname \"$0\")/calls.log\"\n{}\n",
            body
        ),
    );
    let mut perms = fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).unwrap();

    EngineConfig {
        agent_command: script.display().to_string(),
        permission_mode: None,
        ..EngineConfig::default()
    }
}

#[cfg(unix)]
fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[cfg(unix)]
const OK_AGENT: &str = r#"echo '{"type":"result","subtype":"success","is_error":false,"result":"all good","session_id":"stub-session"}'"#;

#[test]
fn test_workflow_validate() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "flow.yaml", WORKFLOW);
    commands::workflow::validate(&file).unwrap();

    let broken = write(
        dir.path(),
        "broken.yaml",
        "name: broken\njobs:\n  main:\n    steps:\n      - id: a\n        prompt: \"${{ steps.z.outputs.result }}\"\n",
    );
    let err = commands::workflow::validate(&broken).unwrap_err();
    assert!(err.contains("does not reference an earlier step"), "{}", err);

    let err = commands::workflow::validate(&dir.path().join("missing.yaml")).unwrap_err();
    assert!(err.contains("Failed to read workflow file"), "{}", err);
}

#[test]
fn test_workflow_status_and_clean() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "flow.yaml", WORKFLOW);
    let log_path = joblog::log_path_for(&file);

    // No log yet
    commands::workflow::status(&file, false).unwrap();
    commands::workflow::clean(&file).unwrap();

    let mut log = joblog::create_log("Integration flow", &file, 2);
    joblog::add_step(&mut log, JobLogStep::new(0, "scan", JobStepStatus::Completed));
    joblog::save(&log, &log_path).unwrap();

    commands::workflow::status(&file, false).unwrap();
    commands::workflow::status(&file, true).unwrap();
    commands::workflow::clean(&file).unwrap();
    assert!(!joblog::exists(&log_path));
}

#[test]
fn test_workflow_status_reports_corrupt_log() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "flow.yaml", WORKFLOW);
    fs::write(joblog::log_path_for(&file), "{ truncated").unwrap();

    let err = commands::workflow::status(&file, false).unwrap_err();
    assert!(err.contains("Corrupt job log"), "{}", err);
}

#[tokio::test]
async fn test_run_rejects_missing_pipeline_file() {
    let dir = TempDir::new().unwrap();
    let err = commands::run::run(
        &EngineConfig::default(),
        &dir.path().join("nope.json"),
        None,
        Some(dir.path().to_path_buf()),
        0,
    )
    .await
    .unwrap_err();
    assert!(err.contains("nope.json"), "{}", err);
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_pipeline_with_stub_agent() {
    let dir = TempDir::new().unwrap();
    let config = stub_agent(dir.path(), OK_AGENT);
    let file = write(
        dir.path(),
        "pipeline.json",
        r#"{
  "model": "sonnet",
  "steps": [
    {"id": "plan", "prompt": "Make a plan"},
    {"id": "build", "prompt": "Build it", "resumeFromStepId": "plan"},
    {"id": "rescue", "prompt": "Rescue", "condition": "on_failure"}
  ]
}"#,
    );

    commands::run::run(&config, &file, None, Some(dir.path().to_path_buf()), 0)
        .await
        .unwrap();

    let calls = calls(dir.path());
    assert_eq!(calls.len(), 2, "rescue must be skipped: {:?}", calls);
    assert!(calls[0].contains("-p Make a plan"));
    assert!(calls[0].contains("--model sonnet"));
    assert!(!calls[0].contains("--resume"));
    assert!(calls[1].contains("--resume stub-session"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_pipeline_reports_step_failure() {
    let dir = TempDir::new().unwrap();
    let config = stub_agent(dir.path(), "echo 'agent exploded' >&2\nexit 3");
    let file = write(
        dir.path(),
        "pipeline.yaml",
        "steps:\n  - id: a\n    prompt: first\n  - id: b\n    prompt: second\n",
    );

    let err = commands::run::run(&config, &file, None, Some(dir.path().to_path_buf()), 0)
        .await
        .unwrap_err();
    assert!(err.contains("agent exploded"), "{}", err);
    // The failure of a does not stop b
    assert_eq!(calls(dir.path()).len(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_workflow_run_writes_and_resumes_job_log() {
    let dir = TempDir::new().unwrap();
    let config = stub_agent(dir.path(), OK_AGENT);
    let file = write(dir.path(), "flow.yaml", WORKFLOW);
    let inputs = vec!["target=lib".to_string()];

    commands::workflow::run(&config, &file, &inputs, Some(dir.path().to_path_buf()), false)
        .await
        .unwrap();

    let calls_after_first = calls(dir.path());
    assert_eq!(calls_after_first.len(), 2);
    assert!(calls_after_first[0].contains("-p Scan lib"));
    assert!(calls_after_first[1].contains("-p Fix all good"));
    assert!(calls_after_first[1].contains("--resume stub-session"));

    let log = joblog::load(&joblog::log_path_for(&file)).unwrap().unwrap();
    assert_eq!(log.status, JobLogStatus::Completed);
    assert_eq!(log.last_completed_step, 1);

    // Everything is already complete: resuming runs nothing
    commands::workflow::run(&config, &file, &inputs, Some(dir.path().to_path_buf()), false)
        .await
        .unwrap();
    assert_eq!(calls(dir.path()).len(), 2);

    // --fresh starts over
    commands::workflow::run(&config, &file, &inputs, Some(dir.path().to_path_buf()), true)
        .await
        .unwrap();
    assert_eq!(calls(dir.path()).len(), 4);
}

#[cfg(unix)]
#[tokio::test]
async fn test_workflow_run_requires_inputs() {
    let dir = TempDir::new().unwrap();
    let config = stub_agent(dir.path(), OK_AGENT);
    let file = write(dir.path(), "flow.yaml", WORKFLOW);

    let err = commands::workflow::run(&config, &file, &[], Some(dir.path().to_path_buf()), false)
        .await
        .unwrap_err();
    assert!(err.contains("Missing required input 'target'"), "{}", err);
    assert!(calls(dir.path()).is_empty());
}
