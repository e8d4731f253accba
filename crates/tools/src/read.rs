//! Read tool: show a file with line numbers.

use async_trait::async_trait;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};
use tracing::debug;

use crate::{checked_path, required_str};

pub const DEFAULT_LINE_LIMIT: usize = 2000;
pub const MAX_LINE_CHARS: usize = 2000;

/// Reads text files in `cat -n` style. Paths under `forbidden_paths` are refused.
pub struct ReadTool {
    forbidden_paths: Vec<String>,
}

impl ReadTool {
    pub fn new(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents with line numbers. \
         Use offset and limit to page through large files."
    }

    fn signature(&self) -> &str {
        "read(file_path: string, offset?: int, limit?: int)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file (relative to the working directory or absolute)"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start from (default: 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default: 2000)"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let raw_path = required_str(&arguments, "file_path")?;
        let path = checked_path(self.name(), raw_path, ctx, &self.forbidden_paths)?;

        let offset = arguments["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = arguments["limit"]
            .as_u64()
            .filter(|l| *l > 0)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LINE_LIMIT);

        debug!(path = %path.display(), offset, limit, "Reading file");

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return Ok(ToolResult::failure(format!(
                    "'{raw_path}' is a directory. Use glob to list its contents."
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::failure(format!("File not found: {raw_path}")));
            }
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read '{raw_path}': {e}"))),
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "read".into(),
                reason: format!("Failed to read '{raw_path}': {e}"),
            })?;

        if bytes.iter().take(8192).any(|b| *b == 0) {
            return Ok(ToolResult::failure(format!(
                "'{raw_path}' appears to be a binary file"
            )));
        }

        let text = String::from_utf8_lossy(&bytes);
        Ok(ToolResult::success(number_lines(&text, offset, limit)))
    }
}

/// Format `limit` lines starting at the 1-based `offset`.
fn number_lines(text: &str, offset: usize, limit: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();

    if total == 0 {
        return "(empty file)".into();
    }
    if offset > total {
        return format!("(offset {offset} is past the end of the file; it has {total} lines)");
    }

    let start = offset - 1;
    let end = (start + limit).min(total);
    let mut out = String::new();
    for (i, line) in lines[start..end].iter().enumerate() {
        let shown = if line.chars().count() > MAX_LINE_CHARS {
            let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
            format!("{cut}... [line truncated]")
        } else {
            (*line).to_string()
        };
        out.push_str(&format!("{:>6}\t{}\n", start + i + 1, shown));
    }

    if end < total {
        out.push_str(&format!(
            "\n... ({} more lines; continue with offset={})\n",
            total - end,
            end + 1
        ));
    }
    out
}
