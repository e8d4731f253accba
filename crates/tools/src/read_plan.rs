//! read_plan tool: fetch the plan document written by a planning session.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use taskloom_context::ContextStore;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};

pub struct ReadPlanTool;

#[async_trait]
impl Tool for ReadPlanTool {
    fn name(&self) -> &str {
        "read_plan"
    }

    fn description(&self) -> &str {
        "Read the implementation plan for a context. Returns the plan.md content which contains \
         the implementation strategy, phases, design decisions, and success criteria. \
         If no context_id is provided, finds the most recent plan."
    }

    fn signature(&self) -> &str {
        "read_plan(context_id?: string)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "context_id": {
                    "type": "string",
                    "description": "The context ID to read the plan from. If omitted, finds the most recent plan."
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let store = ContextStore::new(&ctx.context_base_path);

        // explicit argument, then the current conversation, then the newest plan anywhere
        let requested = arguments["context_id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .map(String::from)
            .or_else(|| ctx.context_id.clone().filter(|id| !id.is_empty()));

        let (context_id, plan_path) = match requested {
            Some(id) => {
                let path = store.plan_path(&id);
                (id, path)
            }
            None => match most_recent_plan(&store.contexts_dir()) {
                Some(found) => found,
                None => {
                    return Ok(ToolResult::failure(format!(
                        "No plans found in: {}\nUse context_id parameter to specify a specific plan.",
                        store.contexts_dir().display()
                    )));
                }
            },
        };

        if !plan_path.exists() {
            return Ok(ToolResult::failure(format!(
                "No plan found for context: {context_id}\nExpected path: {}",
                plan_path.display()
            )));
        }

        let content = match tokio::fs::read_to_string(&plan_path).await {
            Ok(c) => c,
            Err(_) => {
                return Ok(ToolResult::failure(format!(
                    "Failed to read plan file: {}",
                    plan_path.display()
                )));
            }
        };
        if content.is_empty() {
            return Ok(ToolResult::failure(format!(
                "Plan file is empty: {}",
                plan_path.display()
            )));
        }

        Ok(ToolResult::success(format!(
            "# Plan from context: {context_id}\n# Path: {}\n\n{content}",
            plan_path.display()
        )))
    }
}

/// The most recently modified `<contexts>/<id>/plan.md`.
fn most_recent_plan(contexts_dir: &Path) -> Option<(String, PathBuf)> {
    let entries = std::fs::read_dir(contexts_dir).ok()?;
    let mut best: Option<(SystemTime, String, PathBuf)> = None;

    for entry in entries.flatten() {
        let candidate = entry.path().join("plan.md");
        let Ok(mtime) = candidate.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if best.as_ref().is_none_or(|(t, _, _)| mtime > *t) {
            let id = entry.file_name().to_string_lossy().into_owned();
            best = Some((mtime, id, candidate));
        }
    }
    best.map(|(_, id, path)| (id, path))
}
