// Toolflow — Workflow executor
//
// execute_workflow: instruction in, tool chain run on the server, summary out.
// Every tool invocation is appended to the run log under a fresh run id.

pub mod prompt;

use crate::config::AgentDefaults;
use crate::provider::{LLMProvider, Message, ToolCall, ToolDefinition};
use crate::runlog::RunLogger;
use crate::tool::{ToolRegistry, ToolResult};
use crate::workflow::{Workflow, WorkflowCatalog};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

pub const ITERATION_LIMIT_NOTICE: &str =
    "(Run reached maximum tool iterations without a final response)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: String,
    pub success: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub run_id: Uuid,
    /// Name of the workflow the instruction matched, if any.
    pub workflow: Option<String>,
    pub output: String,
    pub invocations: Vec<ToolInvocation>,
    pub iterations: usize,
    /// False when the iteration limit cut the run short.
    pub completed: bool,
}

impl WorkflowOutcome {
    /// Whether the successful invocations contain the matched workflow's
    /// tools as an ordered subsequence. `None` when no workflow matched.
    pub fn followed_workflow(&self, catalog: &WorkflowCatalog) -> Option<bool> {
        let wf = catalog.get(self.workflow.as_deref()?)?;
        let mut steps = wf.tools.iter().peekable();
        for inv in self.invocations.iter().filter(|i| i.success) {
            if steps.peek().is_some_and(|s| **s == inv.tool) {
                steps.next();
            }
        }
        Some(steps.peek().is_none())
    }
}

pub struct WorkflowExecutor {
    tools: ToolRegistry,
    catalog: WorkflowCatalog,
    run_log: RunLogger,
    defaults: AgentDefaults,
}

impl WorkflowExecutor {
    pub fn new(
        tools: ToolRegistry,
        catalog: WorkflowCatalog,
        run_log: RunLogger,
        defaults: AgentDefaults,
    ) -> Self {
        Self {
            tools,
            catalog,
            run_log,
            defaults,
        }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    pub fn run_log(&self) -> &RunLogger {
        &self.run_log
    }

    /// Run an instruction to completion against the tool server.
    pub async fn execute_workflow(
        &self,
        llm: &dyn LLMProvider,
        instruction: &str,
    ) -> anyhow::Result<WorkflowOutcome> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            anyhow::bail!("instruction is empty");
        }

        let run_id = Uuid::new_v4();
        self.run(llm, instruction, run_id)
            .instrument(tracing::info_span!("run", run_id = %run_id))
            .await
    }

    async fn run(
        &self,
        llm: &dyn LLMProvider,
        instruction: &str,
        run_id: Uuid,
    ) -> anyhow::Result<WorkflowOutcome> {
        let model = llm.default_model().to_string();
        let workflow = self.catalog.match_instruction(instruction);

        let tool_defs = self.exposed_tools(workflow).await;
        tracing::info!(
            workflow = %workflow.map(|w| w.name.as_str()).unwrap_or("-"),
            tools = tool_defs.len(),
            model = %model,
            "Starting run"
        );

        let mut messages = vec![
            Message::system(prompt::build_system_prompt(&tool_defs, workflow, &self.catalog)),
            Message::user(instruction),
        ];
        let options = self.chat_options();

        let mut outcome = WorkflowOutcome {
            run_id,
            workflow: workflow.map(|w| w.name.clone()),
            output: String::new(),
            invocations: Vec::new(),
            iterations: 0,
            completed: false,
        };

        for iteration in 0..self.defaults.max_tool_iterations {
            outcome.iterations = iteration + 1;
            tracing::debug!(iteration = iteration, messages = messages.len(), "Calling LLM");

            let response = llm.chat(&messages, &tool_defs, &model, &options).await?;

            if let Some(ref usage) = response.usage {
                tracing::debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Token usage"
                );
            }

            if !response.has_tool_calls() {
                outcome.output = response.content;
                outcome.completed = true;
                break;
            }

            let tool_calls = response.tool_calls.unwrap_or_default();
            tracing::info!(
                count = tool_calls.len(),
                names = %tool_calls.iter().map(|tc| tc.function_name()).collect::<Vec<_>>().join(", "),
                "Executing tool calls"
            );

            messages.push(Message::assistant_with_tool_calls(
                response.content,
                tool_calls.clone(),
            ));

            // Sequential on purpose: workflow steps depend on earlier results.
            for call in &tool_calls {
                let result = self
                    .invoke(run_id, call, &tool_defs, &mut outcome.invocations)
                    .await;
                messages.push(Message::tool_result(&call.id, &result.content));
            }
        }

        if !outcome.completed {
            tracing::warn!(
                max_iterations = self.defaults.max_tool_iterations,
                "Run hit the iteration limit"
            );
            outcome.output = ITERATION_LIMIT_NOTICE.to_string();
        }

        tracing::info!(
            invocations = outcome.invocations.len(),
            iterations = outcome.iterations,
            "Run finished"
        );
        Ok(outcome)
    }

    /// Tools offered to the model: the matched workflow's tools in order, or
    /// everything the server registered.
    async fn exposed_tools(&self, workflow: Option<&Workflow>) -> Vec<ToolDefinition> {
        match workflow {
            Some(wf) => {
                let (defs, missing) = self.tools.definitions_for(&wf.tools).await;
                if !missing.is_empty() {
                    tracing::warn!(
                        workflow = %wf.name,
                        missing = %missing.join(", "),
                        "Workflow references tools the server does not provide"
                    );
                }
                defs
            }
            None => self.tools.get_definitions().await,
        }
    }

    async fn invoke(
        &self,
        run_id: Uuid,
        call: &ToolCall,
        exposed: &[ToolDefinition],
        invocations: &mut Vec<ToolInvocation>,
    ) -> ToolResult {
        let name = call.function_name();

        if !exposed.iter().any(|d| d.function.name == name) {
            tracing::warn!(tool = %name, "Model requested a tool that was not offered");
            return ToolResult::error(format!("tool '{}' is not available in this run", name));
        }

        let args: HashMap<String, Value> = match call.parsed_arguments() {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Malformed tool arguments");
                return ToolResult::error(format!("invalid arguments for '{}': {}", name, e));
            }
        };

        if let Err(e) = self.run_log.log(run_id, name).await {
            tracing::warn!(tool = %name, error = %e, "Failed to write run log");
        }

        let start = Instant::now();
        let result = self.tools.execute(name, args).await;
        invocations.push(ToolInvocation {
            tool: name.to_string(),
            success: !result.is_error,
            duration: start.elapsed(),
        });
        result
    }

    fn chat_options(&self) -> HashMap<String, Value> {
        let mut options = HashMap::new();
        options.insert(
            "temperature".to_string(),
            Value::from(self.defaults.temperature),
        );
        options.insert(
            "max_tokens".to_string(),
            Value::from(self.defaults.max_tokens),
        );
        options.insert(
            "max_retries".to_string(),
            Value::from(self.defaults.max_retries),
        );
        options.insert(
            "retry_delay_ms".to_string(),
            Value::from(self.defaults.retry_delay_ms),
        );
        options
    }
}
