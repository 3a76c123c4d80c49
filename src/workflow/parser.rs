use crate::workflow::{Workflow, WorkflowCatalog, WorkflowError};
use std::path::Path;

/// Load a workflow file: a JSON array, or YAML when the extension says so.
pub fn load_catalog(path: &Path) -> Result<WorkflowCatalog, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let workflows = if is_yaml {
        parse_yaml(&content)?
    } else {
        parse_json(&content)?
    };

    tracing::info!(path = %path.display(), count = workflows.len(), "Loaded workflows");
    WorkflowCatalog::from_workflows(workflows)
}

pub fn parse_json(content: &str) -> Result<Vec<Workflow>, WorkflowError> {
    Ok(serde_json::from_str(content)?)
}

pub fn parse_yaml(content: &str) -> Result<Vec<Workflow>, WorkflowError> {
    Ok(serde_yaml::from_str(content)?)
}
