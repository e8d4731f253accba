//! Permission policy seam consulted before each tool call.

use async_trait::async_trait;
use std::path::Path;

/// Verdict for one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny(String),
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionDecision::Allow)
    }
}

/// Decides whether a tool call may run. Implementations may prompt the user
/// and remember approvals, so one instance is shared by a parent loop and
/// all of its subagents.
#[async_trait]
pub trait PermissionPolicy: Send + Sync {
    async fn check(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        working_dir: &Path,
    ) -> PermissionDecision;
}

/// Allows everything. Used by tests and by `--yolo` wiring that has no prompter.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PermissionPolicy for AllowAll {
    async fn check(&self, _tool_name: &str, _arguments: &serde_json::Value, _working_dir: &Path) -> PermissionDecision {
        PermissionDecision::Allow
    }
}
