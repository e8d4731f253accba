//! Edit tool: exact string replacement inside a file.

use async_trait::async_trait;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};
use tracing::debug;

use crate::{checked_path, required_str};

pub struct EditTool {
    forbidden_paths: Vec<String>,
}

impl EditTool {
    pub fn new(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. old_string must match exactly once \
         unless replace_all is true. Read the file first to copy the text verbatim."
    }

    fn signature(&self) -> &str {
        "edit(file_path: string, old_string: string, new_string: string, replace_all?: bool)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default: false)"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let raw_path = required_str(&arguments, "file_path")?;
        let old = arguments["old_string"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'old_string' argument".into()))?;
        let new = arguments["new_string"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'new_string' argument".into()))?;
        let replace_all = arguments["replace_all"].as_bool().unwrap_or(false);

        if old.is_empty() {
            return Ok(ToolResult::failure("old_string must not be empty"));
        }
        if old == new {
            return Ok(ToolResult::failure("old_string and new_string are identical"));
        }

        let path = checked_path(self.name(), raw_path, ctx, &self.forbidden_paths)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::failure(format!("File not found: {raw_path}")));
            }
            Err(e) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "edit".into(),
                    reason: format!("Failed to read '{raw_path}': {e}"),
                });
            }
        };

        let count = content.matches(old).count();
        if count == 0 {
            return Ok(ToolResult::failure(format!("old_string not found in {raw_path}")));
        }
        if count > 1 && !replace_all {
            return Ok(ToolResult::failure(format!(
                "old_string appears {count} times in {raw_path}; add surrounding context or set replace_all"
            )));
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };

        tokio::fs::write(&path, &updated)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "edit".into(),
                reason: format!("Failed to write '{raw_path}': {e}"),
            })?;

        debug!(path = %path.display(), replacements = count, "File edited");

        let noun = if count == 1 { "occurrence" } else { "occurrences" };
        Ok(ToolResult::success(format!("Edited {raw_path}: replaced {count} {noun}")))
    }
}
