//! System prompt assembly.

use std::path::Path;
use taskloom_core::tool::{Tool, ToolRegistry};

/// The default prompt for the top-level coding agent.
pub fn default_system_prompt(working_dir: &Path) -> String {
    format!(
        "You are Taskloom, an autonomous coding agent working inside a software project.\n\n\
         Working directory: {}\n\n\
         # How to work\n\n\
         - Explore before you change anything: use glob and read to understand the code.\n\
         - Make small, targeted edits with edit; use write only for new files.\n\
         - Verify your changes with bash (build, test, lint) when the project supports it.\n\
         - Delegate broad exploration to a subagent with spawn_agent to keep this context focused.\n\
         - When the task is complete, reply with a short summary and no tool calls.\n",
        working_dir.display()
    )
}

/// First sentence of a tool description, or a clipped prefix.
pub fn short_description(description: &str) -> String {
    if let Some(pos) = description.find('.')
        && pos < 100
    {
        return description[..=pos].to_string();
    }
    if description.chars().count() > 80 {
        let cut: String = description.chars().take(77).collect();
        return format!("{cut}...");
    }
    description.to_string()
}

/// Markdown table of tool signatures; full schemas stay behind `describe_tool`.
pub fn tool_table<'a>(tools: impl IntoIterator<Item = &'a dyn Tool>) -> String {
    let mut out = String::from(
        "# Available Tools\n\n| Tool | Signature | Description |\n|------|-----------|-------------|\n",
    );
    for tool in tools {
        out.push_str(&format!(
            "| {} | `{}` | {} |\n",
            tool.name(),
            tool.signature(),
            short_description(tool.description())
        ));
    }
    out.push_str("\nUse `describe_tool(tool_name)` for full parameter documentation.\n");
    out
}

/// Tool table restricted to `names`, in the order given. Unknown names are skipped.
pub fn tool_table_for(registry: &ToolRegistry, names: &[String]) -> String {
    tool_table(names.iter().filter_map(|n| registry.get(n)))
}
