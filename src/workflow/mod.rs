// Toolflow — Workflow definitions
//
// A workflow is a named, ordered list of tool ids. Pinning a tool chain by
// name keeps the LLM from choosing tools non-deterministically.

pub mod parser;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("failed to read workflow file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse workflow JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("failed to parse workflow YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("workflow #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("workflow '{name}' lists no tools")]
    NoTools { name: String },
    #[error("workflow '{name}' has an empty tool id at position {position}")]
    EmptyTool { name: String, position: usize },
    #[error("duplicate workflow name '{name}'")]
    Duplicate { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tools: Vec<String>,
}

impl Workflow {
    /// Numbered steps, one per line, for prompts and CLI listings.
    pub fn render_steps(&self) -> String {
        self.tools
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}", i + 1, t))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: Vec<Workflow>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog, rejecting malformed or duplicate workflows.
    pub fn from_workflows(workflows: Vec<Workflow>) -> Result<Self, WorkflowError> {
        let mut seen = HashSet::new();
        for (index, wf) in workflows.iter().enumerate() {
            if wf.name.trim().is_empty() {
                return Err(WorkflowError::EmptyName { index });
            }
            if wf.tools.is_empty() {
                return Err(WorkflowError::NoTools {
                    name: wf.name.clone(),
                });
            }
            if let Some(position) = wf.tools.iter().position(|t| t.trim().is_empty()) {
                return Err(WorkflowError::EmptyTool {
                    name: wf.name.clone(),
                    position,
                });
            }
            if !seen.insert(wf.name.trim().to_lowercase()) {
                return Err(WorkflowError::Duplicate {
                    name: wf.name.clone(),
                });
            }
        }
        Ok(Self { workflows })
    }

    pub fn get(&self, name: &str) -> Option<&Workflow> {
        let name = name.trim();
        self.workflows
            .iter()
            .find(|wf| wf.name.trim().eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.iter()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Find the workflow an instruction refers to by name.
    ///
    /// Names match case-insensitively on word boundaries. The longest
    /// matching name wins so `sync issues` beats `sync`.
    pub fn match_instruction(&self, instruction: &str) -> Option<&Workflow> {
        let mut best: Option<&Workflow> = None;
        for wf in &self.workflows {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(wf.name.trim()));
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            if !re.is_match(instruction) {
                continue;
            }
            let longer = best.map_or(true, |b| wf.name.trim().len() > b.name.trim().len());
            if longer {
                best = Some(wf);
            }
        }
        if let Some(wf) = best {
            tracing::debug!(workflow = %wf.name, "Instruction matched workflow");
        }
        best
    }

    /// Every tool referenced by any workflow, sorted and deduplicated.
    pub fn tool_names(&self) -> Vec<String> {
        self.workflows
            .iter()
            .flat_map(|wf| wf.tools.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn get_summaries(&self) -> Vec<String> {
        self.workflows
            .iter()
            .map(|wf| {
                if wf.description.is_empty() {
                    format!("- `{}` ({})", wf.name, wf.tools.join(" -> "))
                } else {
                    format!(
                        "- `{}` - {} ({})",
                        wf.name,
                        wf.description,
                        wf.tools.join(" -> ")
                    )
                }
            })
            .collect()
    }
}
