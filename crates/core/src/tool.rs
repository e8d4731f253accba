//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act: run shell commands,
//! read and edit files, delegate to subagents. The name and JSON schema are
//! the stable contract with the model; the executor behind them is not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::DEFAULT_TOOL_TIMEOUT;
use crate::cancel::CancelFlag;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::subagent::SubagentSpawner;

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (may be partial on failure)
    pub output: String,

    /// Why the tool failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Failure that keeps whatever output was produced before it.
    pub fn failure_with_output(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Text recorded in the `tool` message the model sees.
    pub fn to_message_content(&self) -> String {
        if self.success {
            return self.output.clone();
        }
        let error = self.error.as_deref().unwrap_or("unknown error");
        if self.output.is_empty() {
            format!("Error: {error}")
        } else {
            format!("{}\n\nError: {error}", self.output)
        }
    }
}

/// Everything a tool may use while executing a call.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub cancel: CancelFlag,
    pub timeout: Duration,
    /// Root of the context store (`<base>/contexts/<id>/...`)
    pub context_base_path: PathBuf,
    pub context_id: Option<String>,
    /// Depth of the loop issuing the call
    pub spawn_depth: u32,
    pub spawner: Option<Arc<dyn SubagentSpawner>>,
    /// The registry the call was dispatched from
    pub registry: Arc<ToolRegistry>,
}

impl ToolContext {
    /// A context rooted at `working_dir` with no spawner and an empty registry.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            context_base_path: working_dir.join(".taskloom"),
            working_dir,
            cancel: CancelFlag::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
            context_id: None,
            spawn_depth: 0,
            spawner: None,
            registry: Arc::new(ToolRegistry::new()),
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .field("context_id", &self.context_id)
            .field("spawn_depth", &self.spawn_depth)
            .field("has_spawner", &self.spawner.is_some())
            .finish()
    }
}

/// The core Tool trait.
///
/// Implementations report failures through `Err(ToolError)` or a failed
/// [`ToolResult`]; [`ToolRegistry::execute`] folds both into a result so
/// nothing unwinds into the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// One-line call signature, e.g. `read(file_path: string, offset?: int)`.
    fn signature(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The catalog of available tools.
///
/// Built once at startup, then shared read-only behind an `Arc`.
/// Iteration order is by name so prompts are deterministic.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Names are unique; a duplicate is ignored and
    /// `false` is returned.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "Ignoring duplicate tool registration");
            return false;
        }
        self.tools.insert(name, tool);
        true
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tools, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.values().map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.iter().map(|t| t.to_definition()).collect()
    }

    /// Definitions for the tools `filter` accepts.
    pub fn definitions_where(&self, filter: impl Fn(&str) -> bool) -> Vec<ToolDefinition> {
        self.iter()
            .filter(|t| filter(t.name()))
            .map(|t| t.to_definition())
            .collect()
    }

    /// Execute a tool by name. Never returns an error: unknown tools and
    /// tool failures both come back as a failed [`ToolResult`].
    pub async fn execute(&self, name: &str, arguments: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::failure(ToolError::NotFound(name.to_string()).to_string());
        };
        match tool.execute(arguments, ctx).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input"
        }

        fn signature(&self) -> &str {
            "echo(text: string)"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }

        async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            match arguments["text"].as_str() {
                Some(text) => Ok(ToolResult::success(text)),
                None => Err(ToolError::InvalidArguments("text is required".into())),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = registry();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = registry();
        assert!(!registry.register(Box::new(EchoTool)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_definitions_filtered() {
        let registry = registry();
        assert_eq!(registry.definitions().len(), 1);
        assert!(registry.definitions_where(|n| n != "echo").is_empty());
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let registry = registry();
        let ctx = ToolContext::new("/tmp");
        let result = registry
            .execute("echo", serde_json::json!({"text": "hello world"}), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(result.output, "hello world");
    }

    #[tokio::test]
    async fn registry_folds_errors_into_results() {
        let registry = registry();
        let ctx = ToolContext::new("/tmp");

        let missing = registry.execute("nonexistent", serde_json::json!({}), &ctx).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("nonexistent"));

        let bad_args = registry.execute("echo", serde_json::json!({}), &ctx).await;
        assert!(!bad_args.success);
        assert!(bad_args.to_message_content().starts_with("Error: "));
    }

    #[test]
    fn failure_content_keeps_partial_output() {
        let result = ToolResult::failure_with_output("partial", "boom");
        assert_eq!(result.to_message_content(), "partial\n\nError: boom");
    }
}
