//! The agent reasoning loop implementation.
//!
//! One `run()` appends a user message, then alternates model completions
//! and tool execution rounds until the model answers without tool calls,
//! the round budget is spent, the user cancels, or the backend fails.

use std::sync::Arc;
use taskloom_core::agent::{AgentConfig, RunResult, SessionStats, StopReason};
use taskloom_core::cancel::CancelFlag;
use taskloom_core::error::ToolError;
use taskloom_core::message::{Message, MessageToolCall, Role};
use taskloom_core::permission::{PermissionDecision, PermissionPolicy};
use taskloom_core::provider::{Provider, ProviderRequest};
use taskloom_core::subagent::SubagentSpawner;
use taskloom_core::tool::{Tool, ToolContext, ToolRegistry, ToolResult};
use tracing::{debug, info, warn};

use crate::prompt::{default_system_prompt, tool_table};

/// Called for every message appended to the conversation.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    config: AgentConfig,

    /// Consulted before every tool call; `None` allows all calls
    permissions: Option<Arc<dyn PermissionPolicy>>,

    /// Handed to tools so `spawn_agent` can reach the orchestrator
    spawner: Option<Arc<dyn SubagentSpawner>>,

    on_message: Option<MessageCallback>,

    cancel: CancelFlag,

    messages: Vec<Message>,

    stats: SessionStats,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
            permissions: None,
            spawner: None,
            on_message: None,
            cancel: CancelFlag::new(),
            messages: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Share a permission policy (and its session approvals) with this loop.
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionPolicy>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Let the `spawn_agent` tool delegate through `spawner`.
    pub fn with_spawner(mut self, spawner: Arc<dyn SubagentSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Persist or observe messages as they are appended.
    pub fn with_on_message(mut self, callback: MessageCallback) -> Self {
        self.on_message = Some(callback);
        self
    }

    /// Use an externally owned cancellation flag (e.g. the REPL's Ctrl-C flag).
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn set_on_message(&mut self, callback: Option<MessageCallback>) {
        self.on_message = callback;
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn context_id(&self) -> Option<&str> {
        self.config.context_id.as_deref()
    }

    /// Switch the conversation context tools see (e.g. `read_plan`).
    pub fn set_context_id(&mut self, id: Option<String>) {
        self.config.context_id = id;
    }

    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replace the history, e.g. after loading or compacting a context.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn get_stats(&self) -> SessionStats {
        self.stats
    }

    /// Drop the conversation and reset statistics.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.stats = SessionStats::default();
    }

    /// Process a user message until the model stops calling tools.
    pub async fn run(&mut self, user_text: &str) -> RunResult {
        if self.messages.is_empty() {
            let prompt = self.system_prompt();
            self.add_message(Message::system(prompt));
        }
        self.add_message(Message::user(user_text));

        info!(
            context_id = ?self.config.context_id,
            depth = self.config.spawn_depth,
            messages = self.messages.len(),
            "Running agent loop"
        );

        let tool_definitions = self.tools.definitions_where(|name| self.config.is_tool_allowed(name));
        let mut iterations = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return self.finish(StopReason::UserCancelled, iterations);
            }

            let request = ProviderRequest {
                model: self.config.model.clone(),
                messages: self.messages.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                tools: tool_definitions.clone(),
            };

            let completion = tokio::select! {
                response = self.provider.complete(request) => response,
                _ = self.cancel.cancelled() => {
                    return self.finish(StopReason::UserCancelled, iterations);
                }
            };

            let response = match completion {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, iterations, "Completion failed");
                    return RunResult {
                        stop_reason: StopReason::AgentError,
                        final_response: e.to_string(),
                        iterations,
                    };
                }
            };
            self.stats
                .accumulate(response.usage.as_ref(), response.timings.as_ref());

            if !response.message.has_tool_calls() {
                self.add_message(response.message);
                return self.finish(StopReason::Completed, iterations);
            }

            iterations += 1;
            let tool_calls = response.message.tool_calls.clone();
            debug!(iteration = iterations, tool_count = tool_calls.len(), "Executing tool calls");
            self.add_message(response.message);

            for (i, call) in tool_calls.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    self.answer_cancelled(&tool_calls[i..]);
                    return self.finish(StopReason::UserCancelled, iterations);
                }
                let result = self.execute_tool_call(call).await;
                self.add_message(Message::tool_result(&call.id, result.to_message_content()));
            }

            if self.cancel.is_cancelled() {
                return self.finish(StopReason::UserCancelled, iterations);
            }
            if iterations >= self.config.max_iterations {
                warn!(iterations, "Max tool iterations reached");
                return self.finish(StopReason::MaxIterations, iterations);
            }
        }
    }

    fn finish(&self, stop_reason: StopReason, iterations: u32) -> RunResult {
        let final_response = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        info!(?stop_reason, iterations, "Agent loop finished");
        RunResult {
            stop_reason,
            final_response,
            iterations,
        }
    }

    /// Answer calls that will not run so the history stays well-formed.
    fn answer_cancelled(&mut self, calls: &[MessageToolCall]) {
        for call in calls {
            let result = ToolResult::failure(ToolError::Cancelled.to_string());
            self.add_message(Message::tool_result(&call.id, result.to_message_content()));
        }
    }

    async fn execute_tool_call(&self, call: &MessageToolCall) -> ToolResult {
        if !self.config.is_tool_allowed(&call.name) {
            warn!(tool = %call.name, "Tool call outside the allow-list");
            return ToolResult::failure(ToolError::NotPermitted(call.name.clone()).to_string());
        }
        if !self.tools.contains(&call.name) {
            return ToolResult::failure(ToolError::NotFound(call.name.clone()).to_string());
        }

        let arguments = match call.parsed_arguments() {
            Ok(args) => args,
            Err(e) => {
                return ToolResult::failure(ToolError::InvalidArguments(e.to_string()).to_string());
            }
        };

        if let Some(permissions) = &self.permissions
            && let PermissionDecision::Deny(reason) = permissions
                .check(&call.name, &arguments, &self.config.working_dir)
                .await
        {
            info!(tool = %call.name, reason = %reason, "Tool call denied");
            return ToolResult::failure(
                ToolError::PermissionDenied {
                    tool_name: call.name.clone(),
                    reason,
                }
                .to_string(),
            );
        }

        let ctx = self.tool_context();
        let start = std::time::Instant::now();
        let execution = tokio::time::timeout(
            self.config.tool_timeout,
            self.tools.execute(&call.name, arguments, &ctx),
        );

        let result = tokio::select! {
            outcome = execution => match outcome {
                Ok(result) => result,
                Err(_) => ToolResult::failure(
                    ToolError::Timeout {
                        tool_name: call.name.clone(),
                        timeout_secs: self.config.tool_timeout.as_secs(),
                    }
                    .to_string(),
                ),
            },
            _ = self.cancel.cancelled() => ToolResult::failure(ToolError::Cancelled.to_string()),
        };

        debug!(
            tool = %call.name,
            success = result.success,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool executed"
        );
        result
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            working_dir: self.config.working_dir.clone(),
            cancel: self.cancel.clone(),
            timeout: self.config.tool_timeout,
            context_base_path: self.config.context_base_path.clone(),
            context_id: self.config.context_id.clone(),
            spawn_depth: self.config.spawn_depth,
            spawner: self.spawner.clone(),
            registry: self.tools.clone(),
        }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = self
            .config
            .custom_system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(&self.config.working_dir));

        if !self.config.skip_tool_table {
            let allowed: Vec<&dyn Tool> = self
                .tools
                .iter()
                .filter(|t| self.config.is_tool_allowed(t.name()))
                .collect();
            if !allowed.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(&tool_table(allowed));
            }
        }

        if let Some(appendix) = self.config.prompt_appendix.as_deref().filter(|a| !a.is_empty()) {
            prompt.push_str("\n\n");
            prompt.push_str(appendix);
        }
        prompt
    }

    fn add_message(&mut self, message: Message) {
        if let Some(callback) = &self.on_message {
            callback(&message);
        }
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use taskloom_core::message::{Role, tool_results_are_paired};
    use taskloom_core::testing::*;

    struct ListTool;

    #[async_trait]
    impl Tool for ListTool {
        fn name(&self) -> &str {
            "list"
        }

        fn description(&self) -> &str {
            "List a directory. Returns names."
        }

        fn signature(&self) -> &str {
            "list(path: string)"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}})
        }

        async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(format!("a.txt b.txt in {}", arguments["path"].as_str().unwrap_or("."))))
        }
    }

    /// Raises the cancel flag while "running".
    struct CancellingTool;

    #[async_trait]
    impl Tool for CancellingTool {
        fn name(&self) -> &str {
            "interrupt"
        }

        fn description(&self) -> &str {
            "Simulates Ctrl-C during a tool."
        }

        fn signature(&self) -> &str {
            "interrupt()"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, _arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            ctx.cancel.cancel();
            Ok(ToolResult::success("done"))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps."
        }

        fn signature(&self) -> &str {
            "slow()"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, _arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success("late"))
        }
    }

    struct DenyAll;

    #[async_trait]
    impl PermissionPolicy for DenyAll {
        async fn check(&self, _tool: &str, _args: &serde_json::Value, _wd: &std::path::Path) -> PermissionDecision {
            PermissionDecision::Deny("User denied permission".into())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(ListTool));
        registry.register(Box::new(CancellingTool));
        registry.register(Box::new(SlowTool));
        Arc::new(registry)
    }

    fn config() -> AgentConfig {
        AgentConfig::new("mock-model", "/tmp")
    }

    fn agent(provider: Arc<SequentialMockProvider>, config: AgentConfig) -> AgentLoop {
        AgentLoop::new(provider, registry(), config)
    }

    #[tokio::test]
    async fn single_tool_round_completes_in_one_iteration() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("list", serde_json::json!({"path": "/tmp"}))],
            "Let me look.",
            "There are two files.",
        ));
        let mut agent = agent(provider.clone(), config());

        let result = agent.run("list the files in /tmp").await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.final_response, "There are two files.");

        let roles: Vec<Role> = agent.get_messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(agent.get_messages()[3].content, "a.txt b.txt in /tmp");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn text_only_answer_uses_zero_iterations() {
        let provider = Arc::new(SequentialMockProvider::single_text("Hello!"));
        let mut agent = agent(provider, config());
        let result = agent.run("hi").await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(result.iterations, 0);
    }

    #[tokio::test]
    async fn iteration_cap_stops_without_extra_assistant_message() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![make_tool_call("list", serde_json::json!({}))],
            "",
        )]));
        let mut cfg = config();
        cfg.max_iterations = 1;
        let mut agent = agent(provider.clone(), cfg);

        let result = agent.run("keep listing").await;
        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert_eq!(result.iterations, 1);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(agent.get_messages().last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn cancellation_after_tool_round_fabricates_nothing() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![make_tool_call("interrupt", serde_json::json!({}))],
            "",
        )]));
        let mut agent = agent(provider.clone(), config());

        let result = agent.run("do it").await;
        assert_eq!(result.stop_reason, StopReason::UserCancelled);
        assert_eq!(provider.call_count(), 1);
        let last = agent.get_messages().last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "done");
    }

    #[tokio::test]
    async fn cancellation_answers_remaining_calls() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![
                make_tool_call_with_id("c1", "interrupt", serde_json::json!({})),
                make_tool_call_with_id("c2", "list", serde_json::json!({})),
            ],
            "",
        )]));
        let mut agent = agent(provider, config());

        let result = agent.run("go").await;
        assert_eq!(result.stop_reason, StopReason::UserCancelled);
        let messages = agent.get_messages();
        assert!(tool_results_are_paired(messages));
        let last = messages.last().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("c2"));
        assert_eq!(last.content, "Error: Cancelled by user");
    }

    #[tokio::test]
    async fn pre_cancelled_flag_stops_before_completion() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut agent = agent(provider.clone(), config()).with_cancel(cancel);

        let result = agent.run("hi").await;
        assert_eq!(result.stop_reason, StopReason::UserCancelled);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn disallowed_tool_is_not_executed() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("interrupt", serde_json::json!({}))],
            "",
            "ok",
        ));
        let mut cfg = config();
        cfg.allowed_tools = Some(vec!["list".into()]);
        let cancel = CancelFlag::new();
        let mut agent = agent(provider.clone(), cfg).with_cancel(cancel.clone());

        let result = agent.run("x").await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert!(!cancel.is_cancelled());
        assert_eq!(
            agent.get_messages()[3].content,
            "Error: Tool 'interrupt' is not permitted for this agent"
        );

        // only allowed schemas are offered to the model
        let offered: Vec<String> = provider.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(offered, vec!["list".to_string()]);
    }

    #[tokio::test]
    async fn permission_denial_is_a_tool_failure() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("list", serde_json::json!({}))],
            "",
            "understood",
        ));
        let mut agent = agent(provider, config()).with_permissions(Arc::new(DenyAll));
        let result = agent.run("x").await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(
            agent.get_messages()[3].content,
            "Error: Permission denied for list: User denied permission"
        );
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("slow", serde_json::json!({}))],
            "",
            "moving on",
        ));
        let mut cfg = config();
        cfg.tool_timeout = Duration::from_millis(20);
        let mut agent = agent(provider, cfg);

        let result = agent.run("x").await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert!(agent.get_messages()[3].content.contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_reported() {
        let mut bad = make_tool_call_with_id("c2", "list", serde_json::json!({}));
        bad.arguments = "{not json".into();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call_with_id("c1", "teleport", serde_json::json!({})), bad],
            "",
            "ok",
        ));
        let mut agent = agent(provider, config());
        agent.run("x").await;
        let messages = agent.get_messages();
        assert_eq!(messages[3].content, "Error: Tool not found: teleport");
        assert!(messages[4].content.starts_with("Error: Invalid tool arguments"));
        assert!(tool_results_are_paired(messages));
    }

    #[tokio::test]
    async fn provider_failure_is_agent_error() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![Err(
            taskloom_core::error::ProviderError::Network("connection refused".into()),
        )]));
        let mut agent = agent(provider, config());
        let result = agent.run("x").await;
        assert_eq!(result.stop_reason, StopReason::AgentError);
        assert!(result.final_response.contains("connection refused"));
    }

    #[tokio::test]
    async fn system_prompt_built_once_with_tool_table() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("one"),
            make_text_response("two"),
        ]));
        let mut cfg = config();
        cfg.prompt_appendix = Some("<available_agents>\n</available_agents>".into());
        let mut agent = agent(provider, cfg);
        agent.run("first").await;
        agent.run("second").await;

        let messages = agent.get_messages();
        assert_eq!(messages.iter().filter(|m| m.role == Role::System).count(), 1);
        assert!(messages[0].content.contains("| list | `list(path: string)` | List a directory. |"));
        assert!(messages[0].content.ends_with("</available_agents>"));
    }

    #[tokio::test]
    async fn custom_prompt_without_tool_table() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let mut cfg = config();
        cfg.custom_system_prompt = Some("You are terse.".into());
        cfg.skip_tool_table = true;
        let mut agent = agent(provider, cfg);
        agent.run("x").await;
        assert_eq!(agent.get_messages()[0].content, "You are terse.");
    }

    #[tokio::test]
    async fn stats_accumulate_until_clear() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("list", serde_json::json!({}))],
            "",
            "done",
        ));
        let mut agent = agent(provider, config());
        agent.run("x").await;

        let stats = agent.get_stats();
        assert_eq!(stats.total_input, 20);
        assert_eq!(stats.total_output, 10);
        assert_eq!(stats.total_cached, 4);
        assert_eq!(stats.total_predicted_ms, 50.0);

        agent.clear();
        assert!(agent.get_messages().is_empty());
        assert_eq!(agent.get_stats(), SessionStats::default());
    }

    #[tokio::test]
    async fn callback_sees_every_message_once() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("list", serde_json::json!({}))],
            "",
            "done",
        ));
        let mut agent = agent(provider, config()).with_on_message(Arc::new(move |_m: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        agent.run("x").await;
        assert_eq!(seen.load(Ordering::SeqCst), agent.get_messages().len());
    }

    #[tokio::test]
    async fn tool_context_carries_loop_settings() {
        let mut cfg = config();
        cfg.context_id = Some("ctx-1".into());
        cfg.spawn_depth = 2;
        let agent = agent(Arc::new(SequentialMockProvider::new(vec![])), cfg);
        let ctx = agent.tool_context();
        assert_eq!(ctx.context_id.as_deref(), Some("ctx-1"));
        assert_eq!(ctx.spawn_depth, 2);
        assert!(ctx.spawner.is_none());
        assert_eq!(ctx.registry.len(), 3);
    }
}
