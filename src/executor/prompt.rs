// Toolflow — System prompt builder

use crate::provider::ToolDefinition;
use crate::workflow::{Workflow, WorkflowCatalog};

/// Build the system prompt for one run.
///
/// With a matched workflow the model is told to run its tools in order;
/// otherwise it sees the catalog so it can pick a chain itself.
pub fn build_system_prompt(
    tools: &[ToolDefinition],
    workflow: Option<&Workflow>,
    catalog: &WorkflowCatalog,
) -> String {
    let mut parts = vec![
        "You carry out the user's instruction by calling the tools provided. \
         Call tools only when needed and answer with a short summary of what was done."
            .to_string(),
    ];

    if !tools.is_empty() {
        let lines: Vec<String> = tools
            .iter()
            .map(|t| format!("- `{}` - {}", t.function.name, t.function.description))
            .collect();
        parts.push(format!("\n## Available Tools\n{}", lines.join("\n")));
    }

    match workflow {
        Some(wf) => {
            let mut section = format!("\n## Workflow: {}\n", wf.name);
            if !wf.description.is_empty() {
                section.push_str(&wf.description);
                section.push('\n');
            }
            section.push_str(
                "Call exactly these tools, in this order, passing results forward as needed:\n",
            );
            section.push_str(&wf.render_steps());
            parts.push(section);
        }
        None if !catalog.is_empty() => {
            parts.push(format!(
                "\n## Known Workflows\n{}",
                catalog.get_summaries().join("\n")
            ));
        }
        None => {}
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolFunctionDefinition;
    use serde_json::json;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            def_type: "function".into(),
            function: ToolFunctionDefinition {
                name: name.into(),
                description: format!("{} tool", name),
                parameters: json!({"type": "object"}),
            },
        }
    }

    fn catalog() -> WorkflowCatalog {
        WorkflowCatalog::from_workflows(vec![Workflow {
            name: "standup".into(),
            description: "Collect and post the standup".into(),
            tools: vec!["github__list_prs".into(), "slack__post_message".into()],
        }])
        .unwrap()
    }

    #[test]
    fn test_prompt_with_workflow_lists_ordered_steps() {
        let catalog = catalog();
        let wf = catalog.get("standup");
        let prompt = build_system_prompt(&[def("github__list_prs")], wf, &catalog);
        assert!(prompt.contains("## Workflow: standup"));
        assert!(prompt.contains("1. github__list_prs\n2. slack__post_message"));
        assert!(!prompt.contains("Known Workflows"));
    }

    #[test]
    fn test_prompt_without_match_lists_catalog() {
        let catalog = catalog();
        let prompt = build_system_prompt(&[], None, &catalog);
        assert!(prompt.contains("## Known Workflows"));
        assert!(!prompt.contains("Available Tools"));
    }
}
