use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::types::{JobLogRecord, JobLogStatus, JobLogStep, JobStepStatus};
use super::JobLogError;

/// `<epoch-ms>-<8 hex chars>`: sortable by start time, unique across processes.
pub fn new_execution_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Sibling of the workflow file: `flow.yaml` → `flow.job.json`.
pub fn log_path_for(workflow_path: &Path) -> PathBuf {
    workflow_path.with_extension("job.json")
}

pub fn create_log(workflow_name: &str, workflow_file: &Path, total_steps: usize) -> JobLogRecord {
    let now = Utc::now();
    JobLogRecord {
        execution_id: new_execution_id(),
        workflow_name: workflow_name.to_string(),
        workflow_file: workflow_file.display().to_string(),
        start_time: now,
        last_update_time: now,
        status: JobLogStatus::Running,
        last_completed_step: -1,
        total_steps,
        steps: Vec::new(),
    }
}

/// Record a step transition. An entry for the same index is replaced, so
/// the log holds at most one entry per step.
pub fn add_step(log: &mut JobLogRecord, step: JobLogStep) {
    match log.steps.iter_mut().find(|s| s.index == step.index) {
        Some(existing) => *existing = step,
        None => {
            log.steps.push(step);
            log.steps.sort_by_key(|s| s.index);
        }
    }

    log.last_completed_step = log
        .steps
        .iter()
        .filter(|s| s.status == JobStepStatus::Completed)
        .map(|s| s.index as i64)
        .max()
        .unwrap_or(-1);

    let any_failed = log.steps.iter().any(|s| s.status == JobStepStatus::Failed);
    let all_settled =
        log.steps.len() == log.total_steps && log.steps.iter().all(|s| s.status.is_settled());
    log.status = if any_failed {
        JobLogStatus::Failed
    } else if all_settled {
        JobLogStatus::Completed
    } else {
        JobLogStatus::Running
    };
    log.last_update_time = Utc::now();
}

pub fn resume_step_index(log: &JobLogRecord) -> usize {
    (log.last_completed_step + 1).max(0) as usize
}

/// Write the log as pretty JSON. The content goes to a temporary sibling
/// first and is renamed over the target, so readers never see a partial file.
pub fn save(log: &JobLogRecord, path: &Path) -> Result<(), JobLogError> {
    let json = serde_json::to_string_pretty(log)?;
    let io_err = |source| JobLogError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, json).map_err(io_err)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }

    tracing::debug!(
        "[JobLog] Saved {} ({} step(s), status {})",
        path.display(),
        log.steps.len(),
        log.status.as_str()
    );
    Ok(())
}

/// `Ok(None)` when there is no log; `Corrupt` when there is one we cannot trust.
pub fn load(path: &Path) -> Result<Option<JobLogRecord>, JobLogError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(JobLogError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let corrupt = |message: String| JobLogError::Corrupt {
        path: path.display().to_string(),
        message,
    };

    let log: JobLogRecord = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    check_shape(&log).map_err(corrupt)?;

    tracing::debug!(
        "[JobLog] Loaded {} (execution {}, last completed step {})",
        path.display(),
        log.execution_id,
        log.last_completed_step
    );
    Ok(Some(log))
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Delete the log. Returns whether a file was removed.
pub fn remove(path: &Path) -> Result<bool, JobLogError> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("[JobLog] Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(JobLogError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn check_shape(log: &JobLogRecord) -> Result<(), String> {
    if log.last_completed_step < -1 {
        return Err(format!(
            "lastCompletedStep must be >= -1, got {}",
            log.last_completed_step
        ));
    }
    if log.last_completed_step >= log.total_steps as i64 {
        return Err(format!(
            "lastCompletedStep {} is out of range for {} step(s)",
            log.last_completed_step, log.total_steps
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for step in &log.steps {
        if step.index >= log.total_steps {
            return Err(format!(
                "step index {} is out of range for {} step(s)",
                step.index, log.total_steps
            ));
        }
        if !seen.insert(step.index) {
            return Err(format!("duplicate entry for step index {}", step.index));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn completed(index: usize, id: &str) -> JobLogStep {
        let mut step = JobLogStep::new(index, id, JobStepStatus::Completed);
        step.output = Some(format!("{} done", id));
        step
    }

    #[test]
    fn test_log_path_is_sibling() {
        assert_eq!(
            log_path_for(Path::new("/work/flows/refactor.yaml")),
            PathBuf::from("/work/flows/refactor.job.json")
        );
        assert_eq!(log_path_for(Path::new("flow")), PathBuf::from("flow.job.json"));
    }

    #[test]
    fn test_execution_id_format() {
        let id = new_execution_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_execution_id(), id);
    }

    #[test]
    fn test_add_step_replaces_same_index() {
        let mut log = create_log("flow", Path::new("flow.yaml"), 3);
        add_step(&mut log, completed(0, "a"));
        add_step(&mut log, completed(1, "b"));
        assert_eq!(log.last_completed_step, 1);

        let mut failed = JobLogStep::new(1, "b", JobStepStatus::Failed);
        failed.error = Some("boom".into());
        add_step(&mut log, failed);

        assert_eq!(log.steps.len(), 2);
        assert_eq!(log.last_completed_step, 0);
        assert_eq!(log.status, JobLogStatus::Failed);
    }

    #[test]
    fn test_status_completes_when_all_steps_settled() {
        let mut log = create_log("flow", Path::new("flow.yaml"), 2);
        add_step(&mut log, completed(0, "a"));
        add_step(&mut log, JobLogStep::new(1, "b", JobStepStatus::Running));
        assert_eq!(log.status, JobLogStatus::Running);

        let mut skipped = JobLogStep::new(1, "b", JobStepStatus::Skipped);
        skipped.error = Some("Condition 'on_failure' not met".into());
        add_step(&mut log, skipped);
        assert_eq!(log.status, JobLogStatus::Completed);
        assert_eq!(log.last_completed_step, 0);
    }

    #[test]
    fn test_resume_step_index() {
        let mut log = create_log("flow", Path::new("flow.yaml"), 3);
        assert_eq!(resume_step_index(&log), 0);
        add_step(&mut log, completed(0, "a"));
        assert_eq!(log.last_completed_step, 0);
        assert_eq!(resume_step_index(&log), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("flow.job.json");

        let mut log = create_log("flow", Path::new("flow.yaml"), 2);
        let mut step = completed(0, "a");
        step.session_id = Some("abc".into());
        add_step(&mut log, step);
        save(&log, &path).unwrap();

        assert!(exists(&path));
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, log);
        assert_eq!(loaded.step(0).unwrap().session_id.as_deref(), Some("abc"));

        // No temp file left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["lastCompletedStep"], 0);
        assert_eq!(raw["steps"][0]["sessionId"], "abc");
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(&dir.path().join("nope.job.json")).unwrap().is_none());
        assert!(!remove(&dir.path().join("nope.job.json")).unwrap());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.job.json");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path), Err(JobLogError::Corrupt { .. })));

        std::fs::write(&path, r#"{"executionId": "x"}"#).unwrap();
        assert!(matches!(load(&path), Err(JobLogError::Corrupt { .. })));
    }

    #[test]
    fn test_load_rejects_out_of_range_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.job.json");
        let mut log = create_log("flow", Path::new("flow.yaml"), 1);
        log.steps.push(completed(4, "ghost"));
        std::fs::write(&path, serde_json::to_string(&log).unwrap()).unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.job.json");
        save(&create_log("flow", Path::new("flow.yaml"), 1), &path).unwrap();
        assert!(remove(&path).unwrap());
        assert!(!exists(&path));
    }
}
