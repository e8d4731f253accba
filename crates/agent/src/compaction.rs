//! Conversation compaction.
//!
//! Facts that can be pulled out mechanically (user requests, touched files,
//! commands) are extracted directly; the model only writes the narrative.
//! The live history is archived by the store and replaced with one summary
//! message.

use std::sync::Arc;
use std::time::Duration;

use taskloom_context::{ArchiveRef, CompactEntry, ContextStore};
use taskloom_core::agent::{AgentConfig, StopReason};
use taskloom_core::cancel::CancelFlag;
use taskloom_core::error::StoreError;
use taskloom_core::message::{Message, Role};
use taskloom_core::provider::Provider;
use taskloom_core::tool::ToolRegistry;
use tracing::{info, warn};

use crate::loop_runner::AgentLoop;
use crate::subagent::{extract_modifications, first_json_fence};

pub const COMPACTION_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_USER_MESSAGE_CHARS: usize = 1000;

const COMPACTION_PROMPT: &str = r#"# Context Compaction

Read the conversation below and summarize it as JSON in exactly this shape:

```json
{
  "summary": "What the user asked for and what has been done so far",
  "key_decisions": {
    "architectural": ["structural choices that were made"],
    "implementation": ["concrete implementation choices"],
    "rejected": ["approaches considered and dropped, with the reason"]
  },
  "current_state": "Where the work stands right now",
  "pending_tasks": ["work that is still open"]
}
```

Keep file names, function names and error messages exact. Reply with the JSON block only.

## Conversation
{{CONVERSATION}}{{USER_REQUIREMENTS}}"#;

/// Result of a successful compaction.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub archive: ArchiveRef,
    pub entry: CompactEntry,
    /// The conversation as reloaded from the store
    pub messages: Vec<Message>,
    /// False when the summary was synthesized because the model failed
    pub model_summary: bool,
}

/// The part of the entry the model writes.
#[derive(Debug, Default, PartialEq)]
struct Narrative {
    summary: String,
    key_decisions: serde_json::Map<String, serde_json::Value>,
    current_state: String,
    pending_tasks: Vec<String>,
}

impl Narrative {
    fn from_value(value: &serde_json::Value) -> Self {
        Self {
            summary: value["summary"].as_str().unwrap_or_default().to_string(),
            key_decisions: value["key_decisions"].as_object().cloned().unwrap_or_default(),
            current_state: value["current_state"].as_str().unwrap_or_default().to_string(),
            pending_tasks: value["pending_tasks"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect(),
        }
    }
}

/// Runs compactions with the root loop's provider and settings.
pub struct Compactor {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Compactor {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Summarize `messages`, archive them and replace the stored conversation.
    pub async fn compact(
        &self,
        store: &ContextStore,
        context_id: &str,
        messages: &[Message],
        requirements: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<CompactionOutcome, StoreError> {
        let user_messages = extract_user_messages(messages);
        let (files_modified, commands_run) = extract_modifications(messages);

        let prompt = build_prompt(messages, requirements);
        let narrative = match self.summarize(&prompt, cancel).await {
            Ok(narrative) if !narrative.summary.trim().is_empty() => Some(narrative),
            Ok(_) => {
                warn!(context_id, "Model returned an empty summary");
                None
            }
            Err(reason) => {
                warn!(context_id, reason = %reason, "Summary generation failed; using extracted facts");
                None
            }
        };
        let model_summary = narrative.is_some();
        let narrative = narrative.unwrap_or_else(|| Narrative {
            summary: fallback_summary(user_messages.len(), files_modified.len(), commands_run.len()),
            ..Narrative::default()
        });

        let entry = CompactEntry {
            timestamp: String::new(),
            summary: narrative.summary,
            key_decisions: narrative.key_decisions,
            user_messages,
            files_modified,
            commands_run,
            plan_ref: store.has_plan(context_id).then(|| "plan.md".to_string()),
            current_state: narrative.current_state,
            pending_tasks: narrative.pending_tasks,
        };

        let archive = store.compact(context_id, &entry)?;
        let messages = store
            .load(context_id)?
            .map(|state| state.messages)
            .unwrap_or_default();

        info!(context_id, archived = archive.message_count, model_summary, "Compaction complete");
        Ok(CompactionOutcome {
            archive,
            entry,
            messages,
            model_summary,
        })
    }

    async fn summarize(&self, prompt: &str, cancel: &CancelFlag) -> Result<Narrative, String> {
        let mut config = self.config.clone();
        config.max_iterations = 1;
        config.allowed_tools = Some(Vec::new());
        config.skip_tool_table = true;
        config.prompt_appendix = None;
        config.custom_system_prompt =
            Some("You condense coding-agent conversations into structured summaries.".into());

        let mut summarizer =
            AgentLoop::new(self.provider.clone(), self.tools.clone(), config).with_cancel(cancel.clone());

        self.provider.clear_slot().await;
        let outcome = tokio::time::timeout(COMPACTION_TIMEOUT, summarizer.run(prompt)).await;
        self.provider.clear_slot().await;

        let result = outcome.map_err(|_| format!("timed out after {}s", COMPACTION_TIMEOUT.as_secs()))?;
        if result.stop_reason != StopReason::Completed {
            return Err(format!("stopped with {:?}: {}", result.stop_reason, result.final_response));
        }
        parse_narrative(&result.final_response)
    }
}

/// Fenced JSON, then the whole reply as JSON, then the raw text as the summary.
fn parse_narrative(response: &str) -> Result<Narrative, String> {
    if response.contains("```json") {
        let block = first_json_fence(response).ok_or("unterminated JSON block")?;
        let value: serde_json::Value =
            serde_json::from_str(block).map_err(|e| format!("invalid summary JSON: {e}"))?;
        return Ok(Narrative::from_value(&value));
    }

    let trimmed = response.trim();
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) if value.is_object() => Ok(Narrative::from_value(&value)),
        _ => Ok(Narrative {
            summary: trimmed.to_string(),
            ..Narrative::default()
        }),
    }
}

fn build_prompt(messages: &[Message], requirements: Option<&str>) -> String {
    let mut conversation = String::new();
    for message in messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
    {
        conversation.push_str(&format!("**{}**: {}\n\n", message.role.as_str(), message.content));
    }
    let requirements = match requirements.map(str::trim).filter(|r| !r.is_empty()) {
        Some(req) => format!("\n## Additional Requirements\n{req}\n"),
        None => String::new(),
    };
    COMPACTION_PROMPT
        .replace("{{CONVERSATION}}", &conversation)
        .replace("{{USER_REQUIREMENTS}}", &requirements)
}

fn extract_user_messages(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| {
            if m.content.chars().count() > MAX_USER_MESSAGE_CHARS {
                let cut: String = m.content.chars().take(MAX_USER_MESSAGE_CHARS - 3).collect();
                format!("{cut}...")
            } else {
                m.content.clone()
            }
        })
        .collect()
}

fn fallback_summary(user_messages: usize, files: usize, commands: usize) -> String {
    let mut summary = format!("Conversation with {user_messages} user messages. ");
    if files > 0 {
        summary.push_str(&format!("Modified {files} files. "));
    }
    if commands > 0 {
        summary.push_str(&format!("Ran {commands} commands."));
    }
    summary.trim_end().to_string()
}
