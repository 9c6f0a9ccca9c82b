//! Task batch files.
//!
//! A batch is a JSON array of task entries. Entries may be named so later
//! entries can depend on them:
//!
//! ```json
//! [
//!   { "name": "extract", "task_type": "content-extraction", "payload": { "slides": [] } },
//!   { "task_type": "slide-validation", "priority": "high", "timeout": "5s",
//!     "payload": { "slides": [] }, "after": ["extract"] }
//! ]
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use taskgrid_core::{ProcessingResult, TaskId, TaskSpec, TaskState};
use taskgrid_engine::{EngineError, TaskEngine};

#[derive(Debug, Clone, Deserialize)]
pub struct BatchEntry {
    /// Local label, referenced by `after` in later entries.
    #[serde(default)]
    pub name: Option<String>,
    /// Names of earlier entries that must complete first.
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(flatten)]
    pub spec: TaskSpec,
}

pub fn load(path: &Path) -> anyhow::Result<Vec<BatchEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading task batch {}", path.display()))?;
    parse(&content).with_context(|| format!("parsing task batch {}", path.display()))
}

pub fn parse(content: &str) -> anyhow::Result<Vec<BatchEntry>> {
    let entries: Vec<BatchEntry> = serde_json::from_str(content)?;
    let mut seen = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        for dep in &entry.after {
            if !seen.contains(dep) {
                bail!("entry {i} depends on `{dep}`, which is not an earlier named entry");
            }
        }
        if let Some(name) = &entry.name {
            if seen.contains(name) {
                bail!("duplicate entry name `{name}`");
            }
            seen.push(name.clone());
        }
    }
    Ok(entries)
}

/// One line of the run report.
#[derive(Debug, Serialize)]
pub struct Outcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub task_id: TaskId,
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
}

/// Submit entries in order, resolving `after` names to task ids.
pub async fn submit(
    engine: &TaskEngine,
    entries: Vec<BatchEntry>,
) -> anyhow::Result<Vec<(Option<String>, TaskId)>> {
    let mut ids: HashMap<String, TaskId> = HashMap::new();
    let mut submitted = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut spec = entry.spec;
        for dep in &entry.after {
            let id = ids
                .get(dep)
                .with_context(|| format!("unknown dependency name `{dep}`"))?;
            spec.dependencies.push(id.clone());
        }
        let id = engine.add_task(spec).await?;
        if let Some(name) = &entry.name {
            ids.insert(name.clone(), id.clone());
        }
        submitted.push((entry.name, id));
    }

    info!(tasks = submitted.len(), "batch submitted");
    Ok(submitted)
}

/// Wait for every submitted task, sharing one overall deadline.
pub async fn collect(
    engine: &TaskEngine,
    submitted: Vec<(Option<String>, TaskId)>,
    wait: Duration,
) -> Vec<Outcome> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut outcomes = Vec::with_capacity(submitted.len());

    for (name, task_id) in submitted {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let result = match engine.wait_for_task(&task_id, remaining).await {
            Ok(result) => Some(result),
            Err(EngineError::WaitTimeout { .. }) => None,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "could not wait for task");
                None
            }
        };
        let state = engine.task_status(&task_id).await;
        outcomes.push(Outcome {
            name,
            task_id,
            state,
            result,
        });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use taskgrid_core::{Priority, TaskType};

    #[test]
    fn parse_entries() {
        let entries = parse(
            r#"[
                { "name": "a", "task_type": "content-extraction", "payload": { "slides": [] } },
                { "task_type": "slide-validation", "priority": "critical",
                  "timeout": "250ms", "max_retries": 1, "after": ["a"] }
            ]"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name.as_deref(), Some("a"));
        assert_eq!(entries[0].spec.task_type, TaskType::ContentExtraction);
        assert_eq!(entries[1].spec.priority, Priority::Critical);
        assert_eq!(entries[1].spec.timeout, Some(Duration::from_millis(250)));
        assert_eq!(entries[1].spec.max_retries, Some(1));
        assert_eq!(entries[1].after, ["a"]);
    }

    #[test]
    fn bare_timeout_is_seconds() {
        let entries = parse(r#"[ { "task_type": "image-extraction", "timeout": 5 } ]"#).unwrap();
        assert_eq!(entries[0].spec.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn forward_reference_rejected() {
        let err = parse(
            r#"[
                { "task_type": "slide-validation", "after": ["later"] },
                { "name": "later", "task_type": "slide-validation" }
            ]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("later"));
    }

    #[test]
    fn duplicate_name_rejected() {
        let err = parse(
            r#"[
                { "name": "x", "task_type": "slide-validation" },
                { "name": "x", "task_type": "auto-correction" }
            ]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_task_type_rejected() {
        assert!(parse(r#"[ { "task_type": "video-render" } ]"#).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"[ {{ "task_type": "image-extraction" }} ]"#).unwrap();
        let entries = load(f.path()).unwrap();
        assert_eq!(entries[0].spec.task_type, TaskType::ImageExtraction);
    }
}
