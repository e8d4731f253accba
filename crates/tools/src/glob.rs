//! Glob tool: find files by pattern, newest first.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};
use tracing::debug;

use crate::{checked_path, required_str};

pub const MAX_RESULTS: usize = 100;

pub struct GlobTool {
    forbidden_paths: Vec<String>,
}

impl GlobTool {
    pub fn new(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern such as '**/*.rs' or 'src/*.toml'. \
         Results are sorted by modification time, newest first."
    }

    fn signature(&self) -> &str {
        "glob(pattern: string, path?: string)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '**/*.rs'"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (default: working directory)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let pattern = required_str(&arguments, "pattern")?.to_string();
        let base = match arguments["path"].as_str().filter(|p| !p.trim().is_empty()) {
            Some(p) => checked_path(self.name(), p, ctx, &self.forbidden_paths)?,
            None => ctx.working_dir.clone(),
        };

        if !base.is_dir() {
            return Ok(ToolResult::failure(format!(
                "Not a directory: {}",
                base.display()
            )));
        }

        debug!(pattern = %pattern, base = %base.display(), "Globbing");

        let search_base = base.clone();
        let search_pattern = pattern.clone();
        let found = tokio::task::spawn_blocking(move || find_matches(&search_base, &search_pattern))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "glob".into(),
                reason: e.to_string(),
            })?
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid glob pattern '{pattern}': {e}")))?;

        if found.is_empty() {
            return Ok(ToolResult::success(format!("No files found matching pattern: {pattern}")));
        }

        let total = found.len();
        let mut out: Vec<String> = found
            .into_iter()
            .take(MAX_RESULTS)
            .map(|p| p.strip_prefix(&base).unwrap_or(&p).display().to_string())
            .collect();
        if total > MAX_RESULTS {
            out.push(format!("... ({} more files not shown)", total - MAX_RESULTS));
        }
        Ok(ToolResult::success(out.join("\n")))
    }
}

/// Files under `base` matching `pattern`, newest first.
fn find_matches(base: &Path, pattern: &str) -> Result<Vec<PathBuf>, glob::PatternError> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        base.join(pattern).to_string_lossy().into_owned()
    };

    let mut entries: Vec<(PathBuf, SystemTime)> = glob::glob(&full)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .map(|p| {
            let mtime = p
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (p, mtime)
        })
        .collect();

    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(entries.into_iter().map(|(p, _)| p).collect())
}
