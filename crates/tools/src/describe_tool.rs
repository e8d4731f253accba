//! describe_tool: full documentation for one registered tool.

use async_trait::async_trait;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};

pub struct DescribeTool;

#[async_trait]
impl Tool for DescribeTool {
    fn name(&self) -> &str {
        "describe_tool"
    }

    fn description(&self) -> &str {
        "Get full JSON schema and documentation for a tool. Use this when you need detailed \
         parameter information beyond the signature."
    }

    fn signature(&self) -> &str {
        "describe_tool(tool_name: string)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tool_name": {
                    "type": "string",
                    "description": "Name of the tool to describe (e.g., 'bash', 'read', 'edit')"
                }
            },
            "required": ["tool_name"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let Some(tool_name) = arguments["tool_name"].as_str().filter(|n| !n.is_empty()) else {
            return Ok(ToolResult::failure("tool_name is required"));
        };

        let Some(tool) = ctx.registry.get(tool_name) else {
            let mut msg = format!("Unknown tool: {tool_name}\n\nAvailable tools:\n");
            for name in ctx.registry.names() {
                msg.push_str(&format!("  - {name}\n"));
            }
            return Ok(ToolResult::failure(msg));
        };

        let schema = serde_json::to_string_pretty(&tool.parameters_schema())
            .unwrap_or_else(|_| "{}".into());
        Ok(ToolResult::success(format!(
            "# {}\n\n{}\n\n## Signature\n\n`{}`\n\n## JSON Schema\n\n```json\n{}\n```\n",
            tool.name(),
            tool.description(),
            tool.signature(),
            schema
        )))
    }
}
