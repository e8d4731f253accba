//! Subagent request/result types and the spawner seam.
//!
//! Tools live below the agent crate in the dependency graph, so the
//! `spawn_agent` tool talks to the orchestrator through [`SubagentSpawner`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::agent::SessionStats;
use crate::cancel::CancelFlag;

/// Hard cap on nested subagent hops from the root conversation.
pub const MAX_SPAWN_DEPTH: u32 = 3;

/// What to spawn and with which budget.
#[derive(Debug, Clone, Default)]
pub struct SubagentRequest {
    pub agent_name: String,
    pub task: String,
    /// Structured context rendered into the task prompt
    pub context: Option<serde_json::Value>,
    /// 0 means "use the agent definition's default"
    pub max_iterations: u32,
    /// Depth of the loop issuing the request
    pub spawn_depth: u32,
    /// Overrides the parent's working directory when set; relative paths
    /// resolve against the parent's
    pub working_dir: Option<String>,
    /// Working directory of the issuing loop; the root's when unset
    pub parent_working_dir: Option<PathBuf>,
    /// Persist the subagent conversation as its own context
    pub persist: bool,
}

/// What a finished subagent hands back to its parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubagentResult {
    pub success: bool,
    pub output: String,
    /// Structured data pulled from fenced JSON in the subagent's replies
    #[serde(default)]
    pub artifacts: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    pub iterations: u32,
    #[serde(default)]
    pub stats: SessionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Context the conversation was persisted to, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl SubagentResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Runs a child agent loop on behalf of a parent.
#[async_trait]
pub trait SubagentSpawner: Send + Sync {
    async fn spawn(&self, request: SubagentRequest, cancel: &CancelFlag) -> SubagentResult;
}
