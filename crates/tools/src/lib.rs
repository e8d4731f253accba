//! Built-in tool implementations for Taskloom.
//!
//! Tools give the agent the ability to act on a project: run shell
//! commands, read, search and edit files, read plans written by the
//! planning workflow, and delegate work to subagents.

pub mod bash;
pub mod describe_tool;
pub mod edit;
pub mod glob;
pub mod read;
pub mod read_plan;
pub mod spawn_agent;
pub mod write;

use std::path::PathBuf;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{ToolContext, ToolRegistry};

pub use self::bash::BashTool;
pub use self::describe_tool::DescribeTool;
pub use self::edit::EditTool;
pub use self::glob::GlobTool;
pub use self::read::ReadTool;
pub use self::read_plan::ReadPlanTool;
pub use self::spawn_agent::SpawnAgentTool;
pub use self::write::WriteTool;

/// Create the registry with every built-in tool.
///
/// File tools refuse `forbidden_paths` on their own, independent of the
/// permission manager, so a yolo session still cannot touch `~/.ssh`.
pub fn default_registry(forbidden_paths: &[String]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(BashTool));
    registry.register(Box::new(ReadTool::new(forbidden_paths.to_vec())));
    registry.register(Box::new(GlobTool::new(forbidden_paths.to_vec())));
    registry.register(Box::new(WriteTool::new(forbidden_paths.to_vec())));
    registry.register(Box::new(EditTool::new(forbidden_paths.to_vec())));
    registry.register(Box::new(ReadPlanTool));
    registry.register(Box::new(DescribeTool));
    registry.register(Box::new(SpawnAgentTool));
    registry
}

pub(crate) fn required_str<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// Resolve `path` against the context's working directory, refusing forbidden locations.
pub(crate) fn checked_path(
    tool_name: &str,
    path: &str,
    ctx: &ToolContext,
    forbidden_paths: &[String],
) -> Result<PathBuf, ToolError> {
    taskloom_security::validate_path(path, &ctx.working_dir, forbidden_paths).map_err(|e| {
        ToolError::PermissionDenied {
            tool_name: tool_name.to_string(),
            reason: e.to_string(),
        }
    })
}
