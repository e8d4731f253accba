//! Write tool: create or overwrite a file.

use async_trait::async_trait;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};
use tracing::debug;

use crate::{checked_path, required_str};

pub struct WriteTool {
    forbidden_paths: Vec<String>,
}

impl WriteTool {
    pub fn new(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it and any missing parent directories. \
         Overwrites existing files; prefer edit for targeted changes."
    }

    fn signature(&self) -> &str {
        "write(file_path: string, content: string)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file (relative to the working directory or absolute)"
                },
                "content": {
                    "type": "string",
                    "description": "The full content to write"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let raw_path = required_str(&arguments, "file_path")?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;
        let path = checked_path(self.name(), raw_path, ctx, &self.forbidden_paths)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "write".into(),
                    reason: format!("Failed to create directory '{}': {e}", parent.display()),
                })?;
        }

        let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "write".into(),
                reason: format!("Failed to write '{raw_path}': {e}"),
            })?;

        debug!(path = %path.display(), bytes = content.len(), "File written");

        let verb = if existed { "Updated" } else { "Created" };
        Ok(ToolResult::success(format!(
            "{verb} {raw_path} ({} bytes, {} lines)",
            content.len(),
            content.lines().count()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let result = WriteTool::new(vec![])
            .execute(
                serde_json::json!({"file_path": "src/deep/mod.rs", "content": "fn main() {}\n"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.starts_with("Created src/deep/mod.rs"));
        let written = std::fs::read_to_string(dir.path().join("src/deep/mod.rs")).unwrap();
        assert_eq!(written, "fn main() {}\n");
    }

    #[tokio::test]
    async fn write_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let ctx = ToolContext::new(dir.path());
        let result = WriteTool::new(vec![])
            .execute(serde_json::json!({"file_path": "a.txt", "content": "new"}), &ctx)
            .await
            .unwrap();
        assert!(result.output.starts_with("Updated"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn write_requires_content() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let result = WriteTool::new(vec![])
            .execute(serde_json::json!({"file_path": "a.txt"}), &ctx)
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
