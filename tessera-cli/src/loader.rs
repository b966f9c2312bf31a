//! Workflow definition files.

use std::fs;
use std::path::{Path, PathBuf};
use tessera::TesseraError;
use tessera::model::Workflow;
use tessera::workflow::WorkflowError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported definition format '{0}', expected .yaml, .yml or .json")]
    UnsupportedFormat(String),

    #[error("Invalid YAML definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Runtime(#[from] TesseraError),

    #[error("Workflow rejected ({code}): {error}")]
    Rejected { code: String, error: String },
}

/// Load a workflow definition. The format follows the file extension.
pub fn load_workflow(path: &Path) -> Result<Workflow, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&raw)?),
        "json" => Ok(serde_json::from_str(&raw)?),
        other => Err(CliError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tessera::model::{StepStatus, WorkflowStatus};
    use tempfile::Builder;

    fn fixture(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_fills_runtime_defaults() {
        let file = fixture(
            ".yaml",
            r#"
workflow_id: release
workflow_name: Release
steps:
  - step_id: build
    step_name: Build
    agent_id: builder
    input_data:
      target: x86_64
  - step_id: test
    step_name: Test
    agent_id: tester
    depends_on: [build]
"#,
        );

        let workflow = load_workflow(file.path()).unwrap();
        assert_eq!(workflow.workflow_id, "release");
        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert_eq!(workflow.steps.len(), 2);
        assert_eq!(workflow.steps[0].input_data["target"], "x86_64");
        assert_eq!(workflow.steps[1].depends_on, vec!["build"]);
        assert_eq!(workflow.steps[1].status, StepStatus::Pending);
        assert_eq!(workflow.steps[1].max_retries, 3);
    }

    #[test]
    fn test_load_json() {
        let file = fixture(
            ".json",
            r#"{"workflow_id":"wf","workflow_name":"WF","steps":[{"step_id":"a","step_name":"A","agent_id":"x"}]}"#,
        );

        let workflow = load_workflow(file.path()).unwrap();
        assert_eq!(workflow.steps[0].agent_id, "x");
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let file = fixture(".toml", "workflow_id = 'wf'");
        assert!(matches!(
            load_workflow(file.path()),
            Err(CliError::UnsupportedFormat(ext)) if ext == "toml"
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let file = fixture(".yml", "workflow_id: wf\nsteps: []\n");
        assert!(matches!(load_workflow(file.path()), Err(CliError::Yaml(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_workflow(Path::new("/nonexistent/workflow.yaml"));
        assert!(matches!(result, Err(CliError::Read { .. })));
    }
}
