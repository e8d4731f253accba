//! Subagent orchestration.
//!
//! A subagent is a fresh [`AgentLoop`] built from an [`AgentDefinition`]:
//! its own conversation, the definition's tool allow-list and iteration cap,
//! and one more level of spawn depth than its parent. The parent blocks on
//! the child, and the inference slot is erased around the child's run so
//! neither sees the other's cached prompt.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use taskloom_context::ContextStore;
use taskloom_core::agent::{AgentConfig, StopReason};
use taskloom_core::cancel::CancelFlag;
use taskloom_core::error::AgentError;
use taskloom_core::message::{Message, Role};
use taskloom_core::permission::PermissionPolicy;
use taskloom_core::provider::Provider;
use taskloom_core::subagent::{MAX_SPAWN_DEPTH, SubagentRequest, SubagentResult, SubagentSpawner};
use taskloom_core::tool::ToolRegistry;
use tracing::{info, warn};

use crate::loop_runner::AgentLoop;
use crate::prompt::tool_table_for;
use crate::registry::{AgentDefinition, AgentRegistry};

const MAX_COMMAND_CHARS: usize = 200;

/// Spawns subagents on behalf of any loop that holds it as its spawner.
pub struct SubagentOrchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    agents: Arc<AgentRegistry>,
    /// Settings inherited by every child: model, sampling, timeouts, paths
    base_config: AgentConfig,
    permissions: Option<Arc<dyn PermissionPolicy>>,
    store: ContextStore,
    /// Handed to child loops so subagents can spawn in turn
    self_ref: Weak<SubagentOrchestrator>,
}

impl SubagentOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        agents: Arc<AgentRegistry>,
        base_config: AgentConfig,
        permissions: Option<Arc<dyn PermissionPolicy>>,
    ) -> Arc<Self> {
        let store = ContextStore::new(base_config.context_base_path.clone());
        Arc::new_cyclic(|self_ref| Self {
            provider,
            tools,
            agents,
            base_config,
            permissions,
            store,
            self_ref: self_ref.clone(),
        })
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// The child's working directory: the override resolved against the
    /// parent's directory, or the parent's directory itself.
    fn resolve_working_dir(&self, request: &SubagentRequest) -> Result<PathBuf, AgentError> {
        let parent = request
            .parent_working_dir
            .as_deref()
            .unwrap_or(&self.base_config.working_dir);
        let Some(requested) = request.working_dir.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(parent.to_path_buf());
        };
        let path = Path::new(requested);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            parent.join(path)
        };
        match joined.canonicalize() {
            Ok(dir) if dir.is_dir() => Ok(dir),
            _ => Err(AgentError::InvalidWorkingDir(requested.to_string())),
        }
    }

    fn child_config(&self, def: &AgentDefinition, request: &SubagentRequest, working_dir: PathBuf) -> AgentConfig {
        let mut config = self.base_config.clone();
        config.working_dir = working_dir;
        config.max_iterations = if request.max_iterations > 0 {
            request.max_iterations
        } else {
            def.max_iterations
        };
        config.allowed_tools = Some(def.allowed_tools.clone());
        config.custom_system_prompt = None;
        config.skip_tool_table = true;
        config.prompt_appendix = None;
        config.context_id = None;
        config.spawn_depth = request.spawn_depth + 1;
        config
    }

    async fn run_subagent(
        &self,
        def: &AgentDefinition,
        request: &SubagentRequest,
        cancel: &CancelFlag,
    ) -> Result<SubagentResult, AgentError> {
        let working_dir = self.resolve_working_dir(request)?;
        let mut config = self.child_config(def, request, working_dir);

        let persisted_id = if request.persist {
            match self.store.create() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "Could not create context for subagent; running unpersisted");
                    None
                }
            }
        } else {
            None
        };
        config.context_id = persisted_id.clone();

        let mut child = AgentLoop::new(self.provider.clone(), self.tools.clone(), config)
            .with_cancel(cancel.clone());
        if let Some(permissions) = &self.permissions {
            child = child.with_permissions(permissions.clone());
        }
        if let Some(me) = self.self_ref.upgrade() {
            child = child.with_spawner(me);
        }
        if let Some(id) = persisted_id.clone() {
            let store = self.store.clone();
            child = child.with_on_message(Arc::new(move |message: &Message| {
                if let Err(e) = store.append_message(&id, message) {
                    warn!(context_id = %id, error = %e, "Failed to persist subagent message");
                }
            }));
        }

        let prompt = format!(
            "{}\n\n# Task\n\n{}",
            generate_system_prompt(def, &self.tools),
            task_prompt(request)
        );

        self.provider.clear_slot().await;
        let outcome = child.run(&prompt).await;
        self.provider.clear_slot().await;

        let messages = child.get_messages();
        let (files_modified, commands_run) = extract_modifications(messages);
        let error = match outcome.stop_reason {
            StopReason::Completed => None,
            StopReason::MaxIterations => Some("Subagent reached max iterations"),
            StopReason::UserCancelled => Some("Subagent was cancelled"),
            StopReason::AgentError => Some("Subagent encountered an error"),
        };

        Ok(SubagentResult {
            success: error.is_none(),
            output: outcome.final_response,
            artifacts: extract_artifacts(messages),
            files_modified,
            commands_run,
            iterations: outcome.iterations,
            stats: child.get_stats(),
            error: error.map(str::to_string),
            context_id: persisted_id,
        })
    }
}

#[async_trait]
impl SubagentSpawner for SubagentOrchestrator {
    async fn spawn(&self, request: SubagentRequest, cancel: &CancelFlag) -> SubagentResult {
        if request.spawn_depth >= MAX_SPAWN_DEPTH {
            warn!(depth = request.spawn_depth, agent = %request.agent_name, "Spawn depth exceeded");
            return SubagentResult::failure(
                AgentError::SpawnDepthExceeded { max: MAX_SPAWN_DEPTH }.to_string(),
            );
        }
        let Some(def) = self.agents.get(&request.agent_name) else {
            return SubagentResult::failure(AgentError::UnknownAgent(request.agent_name.clone()).to_string());
        };

        info!(
            agent = %def.name,
            depth = request.spawn_depth + 1,
            persist = request.persist,
            "Spawning subagent"
        );

        match self.run_subagent(def, &request, cancel).await {
            Ok(result) => {
                info!(
                    agent = %def.name,
                    success = result.success,
                    iterations = result.iterations,
                    files = result.files_modified.len(),
                    "Subagent finished"
                );
                result
            }
            Err(e) => SubagentResult::failure(e.to_string()),
        }
    }
}

/// The task text, with any structured context rendered as a JSON block.
fn task_prompt(request: &SubagentRequest) -> String {
    match &request.context {
        Some(context) => {
            let pretty = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
            format!("{}\n\n## Context\n\n```json\n{pretty}\n```", request.task)
        }
        None => request.task.clone(),
    }
}

/// Instructions a subagent receives ahead of its task.
pub fn generate_system_prompt(def: &AgentDefinition, tools: &ToolRegistry) -> String {
    let mut prompt = format!("You are {}, a specialized subagent.\n\n", def.name);
    prompt.push_str(&def.instructions);
    prompt.push_str("\n\n");

    if def.allowed_tools.is_empty() {
        prompt.push_str(
            "# No Tools Available\n\n\
             You do not have access to any tools. Please provide your analysis and response \
             based on the context provided.\n\n",
        );
    } else {
        prompt.push_str(&tool_table_for(tools, &def.allowed_tools));
        prompt.push('\n');
    }

    prompt.push_str(
        "# Guidelines\n\n\
         - Focus on completing the task efficiently\n\
         - Be concise in your responses\n\
         - When finished, provide a clear summary of what you accomplished\n",
    );
    prompt
}

/// Body of the first ```` ```json ```` fence in `text`, if closed.
pub(crate) fn first_json_fence(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')).unwrap_or(rest);
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// Structured output from fenced JSON in assistant replies.
///
/// Question blocks belong to the planning Q&A and are skipped; the last
/// remaining block becomes `data`.
pub fn extract_artifacts(messages: &[Message]) -> serde_json::Map<String, serde_json::Value> {
    let mut artifacts = serde_json::Map::new();
    for message in messages.iter().filter(|m| m.role == Role::Assistant) {
        let Some(block) = first_json_fence(&message.content) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(block) else {
            continue;
        };
        if value.get("questions").is_none() {
            artifacts.insert("data".into(), value);
        }
    }
    artifacts
}

/// Files written or edited and commands run, including those reported by
/// nested `spawn_agent` calls. File paths are deduplicated.
pub fn extract_modifications(messages: &[Message]) -> (Vec<String>, Vec<String>) {
    let mut files: Vec<String> = Vec::new();
    let mut commands: Vec<String> = Vec::new();
    for message in messages.iter().filter(|m| m.role == Role::Assistant) {
        for call in &message.tool_calls {
            let Ok(args) = call.parsed_arguments() else {
                continue;
            };
            match call.name.as_str() {
                "write" | "edit" => {
                    if let Some(path) = args["file_path"].as_str() {
                        push_unique(&mut files, path);
                    }
                }
                "bash" => {
                    if let Some(command) = args["command"].as_str() {
                        commands.push(truncate_command(command));
                    }
                }
                "spawn_agent" => {
                    let Some(result) = messages
                        .iter()
                        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call.id.as_str()))
                    else {
                        continue;
                    };
                    let Ok(nested) = serde_json::from_str::<serde_json::Value>(&result.content) else {
                        continue;
                    };
                    for path in nested["files_modified"].as_array().into_iter().flatten() {
                        if let Some(path) = path.as_str() {
                            push_unique(&mut files, path);
                        }
                    }
                    for command in nested["commands_run"].as_array().into_iter().flatten() {
                        if let Some(command) = command.as_str() {
                            commands.push(command.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }
    (files, commands)
}

fn push_unique(files: &mut Vec<String>, path: &str) {
    if !files.iter().any(|f| f == path) {
        files.push(path.to_string());
    }
}

fn truncate_command(command: &str) -> String {
    if command.chars().count() > MAX_COMMAND_CHARS {
        let cut: String = command.chars().take(MAX_COMMAND_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        command.to_string()
    }
}
