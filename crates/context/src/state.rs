//! Persisted conversation records and compaction entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskloom_core::message::{Message, Role};

/// A conversation as stored in `conversation.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Short one-line description built from the first user message.
    pub fn preview(&self) -> String {
        let first_user = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.split_whitespace().collect::<Vec<_>>().join(" "));
        match first_user {
            Some(text) if text.chars().count() > PREVIEW_CHARS => {
                let cut: String = text.chars().take(PREVIEW_CHARS - 3).collect();
                format!("{cut}...")
            }
            Some(text) => text,
            None => "(empty)".into(),
        }
    }
}

const PREVIEW_CHARS: usize = 60;

/// Listing entry for `/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub preview: String,
}

/// Facts and narrative produced by a compaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactEntry {
    /// Set by the store when the entry is written (`%Y%m%d_%H%M%S`)
    #[serde(default)]
    pub timestamp: String,
    pub summary: String,
    #[serde(default)]
    pub key_decisions: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub user_messages: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_ref: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_state: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tasks: Vec<String>,
}

impl CompactEntry {
    /// The single system message that replaces the compacted history.
    pub fn to_summary_message(&self) -> String {
        let mut out = format!("# Previous Context Summary\n\n{}\n", self.summary);

        if !self.current_state.is_empty() {
            out.push_str(&format!("\n## Current State\n{}\n", self.current_state));
        }
        if !self.pending_tasks.is_empty() {
            out.push_str("\n## Pending Tasks\n");
            for task in &self.pending_tasks {
                out.push_str(&format!("- {task}\n"));
            }
        }
        if !self.files_modified.is_empty() {
            out.push_str("\n## Files Modified\n");
            for file in &self.files_modified {
                out.push_str(&format!("- {file}\n"));
            }
        }
        if self.plan_ref.is_some() {
            out.push_str("\n## Active Plan\nplan.md exists - use read_plan tool to review if needed\n");
        }
        out
    }
}

/// Pointer to one compaction archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRef {
    pub timestamp: String,
    /// File name of the archived message array
    pub archive: String,
    /// File name of the compact entry
    pub compact_ref: String,
    pub message_count: usize,
}
