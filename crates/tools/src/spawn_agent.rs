//! spawn_agent: delegate a focused task to a subagent with a fresh context.

use async_trait::async_trait;
use taskloom_core::error::ToolError;
use taskloom_core::subagent::SubagentRequest;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};
use tracing::info;

pub struct SpawnAgentTool;

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a subagent to perform a specialized task with a fresh context.\n\n\
         The subagent runs with its own context window, preventing pollution of the main agent's context. \
         Results are returned to the main agent upon completion.\n\n\
         Use this when:\n\
         - A task requires deep exploration that would pollute main context\n\
         - Specialized behavior (planning, code review, etc.) is needed\n\
         - You want to delegate a focused subtask\n\n\
         Available agents can be discovered from AGENT.md files in:\n\
         - ./.taskloom/agents/ (project-local)\n\
         - ~/.taskloom/agents/ (user-global)"
    }

    fn signature(&self) -> &str {
        "spawn_agent(agent_name: string, task: string, context?: object, max_iterations?: int, working_dir?: string)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of the agent to spawn (e.g., 'explorer-agent', 'planning-agent')"
                },
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to perform"
                },
                "context": {
                    "type": "object",
                    "description": "Additional context to pass to the subagent (optional)"
                },
                "max_iterations": {
                    "type": "integer",
                    "description": "Maximum iterations for the subagent (default: the agent's own limit)"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Scope subagent to this directory (relative to current or absolute). Access outside triggers user permission."
                }
            },
            "required": ["agent_name", "task"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let Some(spawner) = ctx.spawner.as_ref() else {
            return Ok(ToolResult::failure("Subagent manager not available in this context"));
        };

        let Some(agent_name) = arguments["agent_name"].as_str().filter(|s| !s.is_empty()) else {
            return Ok(ToolResult::failure("agent_name is required"));
        };
        let Some(task) = arguments["task"].as_str().filter(|s| !s.is_empty()) else {
            return Ok(ToolResult::failure("task is required"));
        };

        let request = SubagentRequest {
            agent_name: agent_name.to_string(),
            task: task.to_string(),
            context: arguments
                .get("context")
                .filter(|c| c.as_object().is_some_and(|o| !o.is_empty()))
                .cloned(),
            max_iterations: arguments["max_iterations"]
                .as_u64()
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(0),
            spawn_depth: ctx.spawn_depth,
            working_dir: arguments["working_dir"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(String::from),
            parent_working_dir: Some(ctx.working_dir.clone()),
            persist: false,
        };

        info!(agent = %agent_name, depth = ctx.spawn_depth, "Spawning subagent");
        let result = spawner.spawn(request, &ctx.cancel).await;

        if !result.success {
            let error = result.error.unwrap_or_else(|| "Subagent failed".into());
            return Ok(ToolResult::failure_with_output(result.output, error));
        }

        let mut output = serde_json::json!({
            "agent": agent_name,
            "result": result.output,
            "iterations": result.iterations,
            "stats": {
                "input_tokens": result.stats.total_input,
                "output_tokens": result.stats.total_output,
            },
        });
        if !result.artifacts.is_empty() {
            output["artifacts"] = serde_json::Value::Object(result.artifacts);
        }
        if !result.files_modified.is_empty() {
            output["files_modified"] = serde_json::json!(result.files_modified);
        }
        if !result.commands_run.is_empty() {
            output["commands_run"] = serde_json::json!(result.commands_run);
        }

        let text = serde_json::to_string_pretty(&output).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "spawn_agent".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult::success(text))
    }
}
