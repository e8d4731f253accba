//! Everything one interactive session owns: the root agent loop, its
//! tools and subagents, the permission manager and the current context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use taskloom_agent::{
    AgentLoop, AgentRegistry, Compactor, SubagentOrchestrator, default_search_paths,
};
use taskloom_config::AppConfig;
use taskloom_context::ContextStore;
use taskloom_core::agent::{AgentConfig, RunResult, StopReason, clamp_max_iterations};
use taskloom_core::cancel::CancelFlag;
use taskloom_core::permission::PermissionPolicy;
use taskloom_core::provider::Provider;
use taskloom_core::tool::ToolRegistry;
use taskloom_security::{ApprovalPrompter, PermissionManager};
use taskloom_workflow::PlanningDriver;
use tracing::{info, warn};

/// Command-line settings layered over [`AppConfig`].
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub working_dir: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub yolo: bool,
    /// Shared with the Ctrl-C handler and the terminal prompts
    pub cancel: CancelFlag,
}

pub struct App {
    config: AppConfig,
    working_dir: PathBuf,
    data_dir: PathBuf,
    yolo: bool,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    agents: Arc<AgentRegistry>,
    orchestrator: Arc<SubagentOrchestrator>,
    permissions: Arc<dyn PermissionPolicy>,
    store: ContextStore,
    agent: AgentLoop,
    cancel: CancelFlag,
    context_id: String,
}

impl App {
    /// Wire up a session and open a fresh conversation context.
    pub fn new(
        config: AppConfig,
        options: AppOptions,
        provider: Arc<dyn Provider>,
        prompter: Option<Arc<dyn ApprovalPrompter>>,
    ) -> anyhow::Result<Self> {
        let working_dir = options
            .working_dir
            .canonicalize()
            .with_context(|| format!("working directory {} is not accessible", options.working_dir.display()))?;
        if !working_dir.is_dir() {
            anyhow::bail!("{} is not a directory", working_dir.display());
        }
        let data_dir = options
            .data_dir
            .clone()
            .unwrap_or_else(|| config.data_dir_for(&working_dir));
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("cannot create data directory {}", data_dir.display()))?;

        let yolo = options.yolo || config.agent.yolo;
        let mut manager = PermissionManager::new(&config.permissions, yolo).with_root(working_dir.clone());
        if let Some(prompter) = prompter {
            manager = manager.with_prompter(prompter);
        }
        let permissions: Arc<dyn PermissionPolicy> = Arc::new(manager);

        let tools = Arc::new(taskloom_tools::default_registry(&config.permissions.forbidden_paths));
        let agents = Arc::new(AgentRegistry::discover(&default_search_paths(&data_dir, &working_dir)));

        let store = ContextStore::new(data_dir.clone());
        let context_id = store.create().context("cannot create a conversation context")?;

        let mut agent_config = AgentConfig::new(config.default_model.clone(), working_dir.clone());
        agent_config.temperature = config.default_temperature;
        agent_config.max_tokens = Some(config.default_max_tokens);
        agent_config.max_iterations = options
            .max_iterations
            .map(clamp_max_iterations)
            .unwrap_or(config.agent.max_iterations);
        agent_config.tool_timeout = config.agent.tool_timeout();
        agent_config.context_base_path = data_dir.clone();

        let orchestrator = SubagentOrchestrator::new(
            provider.clone(),
            tools.clone(),
            agents.clone(),
            agent_config.clone(),
            Some(permissions.clone()),
        );

        let mut root_config = agent_config;
        root_config.context_id = Some(context_id.clone());
        let appendix = agents.generate_prompt_section();
        root_config.prompt_appendix = (!appendix.is_empty()).then_some(appendix);

        let cancel = options.cancel;
        let agent = AgentLoop::new(provider.clone(), tools.clone(), root_config)
            .with_permissions(permissions.clone())
            .with_spawner(orchestrator.clone())
            .with_cancel(cancel.clone());

        info!(
            working_dir = %working_dir.display(),
            data_dir = %data_dir.display(),
            context_id = %context_id,
            agents = agents.len(),
            yolo,
            "Session ready"
        );

        Ok(Self {
            config,
            working_dir,
            data_dir,
            yolo,
            provider,
            tools,
            agents,
            orchestrator,
            permissions,
            store,
            agent,
            cancel,
            context_id,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_yolo(&self) -> bool {
        self.yolo
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut AgentLoop {
        &mut self.agent
    }

    pub fn cancel(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Run one user turn and persist the conversation afterwards.
    pub async fn run_prompt(&mut self, text: &str) -> RunResult {
        let result = self.agent.run(text).await;
        self.persist();
        if self.cancel.is_cancelled() {
            self.cancel.reset();
        }
        result
    }

    /// Write the live conversation to the current context.
    pub fn persist(&self) {
        if let Err(e) = self.store.save_messages(&self.context_id, self.agent.get_messages()) {
            warn!(context_id = %self.context_id, error = %e, "Failed to save conversation");
        }
    }

    /// Start over in a new, empty context.
    pub fn new_context(&mut self) -> anyhow::Result<&str> {
        let id = self.store.create().context("cannot create a conversation context")?;
        self.agent.clear();
        self.agent.set_context_id(Some(id.clone()));
        self.context_id = id;
        Ok(&self.context_id)
    }

    /// Load a saved context into the agent. Returns its message count.
    pub fn switch_context(&mut self, id: &str) -> anyhow::Result<usize> {
        let state = self
            .store
            .load(id)?
            .with_context(|| format!("context {id} has no conversation"))?;
        let count = state.messages.len();
        self.agent.set_messages(state.messages);
        self.agent.set_context_id(Some(id.to_string()));
        self.context_id = id.to_string();
        Ok(count)
    }

    pub fn compactor(&self) -> Compactor {
        Compactor::new(self.provider.clone(), self.tools.clone(), self.agent.config().clone())
    }

    pub fn planning_driver(&self) -> PlanningDriver {
        let mut config = self.agent.config().clone();
        config.context_id = None;
        config.prompt_appendix = None;
        PlanningDriver::new(
            self.provider.clone(),
            self.tools.clone(),
            self.orchestrator.clone(),
            config,
        )
        .with_permissions(self.permissions.clone())
        .with_cancel(self.cancel.clone())
    }
}

/// The status line printed after every run.
pub fn stop_line(result: &RunResult) -> String {
    match result.stop_reason {
        StopReason::Completed => format!("[Completed in {} iteration(s)]", result.iterations),
        StopReason::MaxIterations => {
            format!("[Stopped: max iterations reached ({})]", result.iterations)
        }
        StopReason::UserCancelled => "[Cancelled by user]".to_string(),
        StopReason::AgentError => "[Error occurred]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_core::testing::*;

    fn app(provider: Arc<SequentialMockProvider>, root: &Path) -> App {
        let options = AppOptions {
            working_dir: root.to_path_buf(),
            data_dir: Some(root.join("data")),
            max_iterations: Some(5000),
            yolo: true,
            ..Default::default()
        };
        App::new(AppConfig::default(), options, provider, None).unwrap()
    }

    #[test]
    fn stop_lines() {
        let line = |stop_reason, iterations| {
            stop_line(&RunResult {
                stop_reason,
                final_response: String::new(),
                iterations,
            })
        };
        assert_eq!(line(StopReason::Completed, 1), "[Completed in 1 iteration(s)]");
        assert_eq!(
            line(StopReason::MaxIterations, 3),
            "[Stopped: max iterations reached (3)]"
        );
        assert_eq!(line(StopReason::UserCancelled, 0), "[Cancelled by user]");
        assert_eq!(line(StopReason::AgentError, 0), "[Error occurred]");
    }

    #[test]
    fn options_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(Arc::new(SequentialMockProvider::new(vec![])), dir.path());
        assert!(app.is_yolo());
        assert_eq!(app.agent().config().max_iterations, 1000);
        assert_eq!(app.data_dir(), dir.path().join("data"));
        assert!(app.store().exists(app.context_id()));
        assert_eq!(app.agent().context_id(), Some(app.context_id()));
        assert!(app.agent().config().prompt_appendix.as_deref().unwrap().contains("planning-agent"));
    }

    #[test]
    fn missing_working_dir_is_an_error() {
        let options = AppOptions {
            working_dir: PathBuf::from("/definitely/not/here"),
            ..Default::default()
        };
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        assert!(App::new(AppConfig::default(), options, provider, None).is_err());
    }

    #[tokio::test]
    async fn runs_are_persisted_and_contexts_switch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("hello")]));
        let mut app = app(provider, dir.path());
        let first = app.context_id().to_string();

        let result = app.run_prompt("hi").await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        let saved = app.store().load(&first).unwrap().unwrap();
        assert_eq!(saved.messages.len(), 3);

        let second = app.new_context().unwrap().to_string();
        assert_ne!(first, second);
        assert!(app.agent().get_messages().is_empty());

        assert_eq!(app.switch_context(&first).unwrap(), 3);
        assert_eq!(app.context_id(), first);
        assert_eq!(app.agent().context_id(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn cancelled_run_resets_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let mut app = app(provider.clone(), dir.path());
        app.cancel().cancel();

        let result = app.run_prompt("anything").await;
        assert_eq!(result.stop_reason, StopReason::UserCancelled);
        assert!(!app.cancel().is_cancelled());
        assert_eq!(provider.call_count(), 0);
    }

    /// Raises the cancel flag while answering, like a Ctrl-C that lands
    /// just as the final reply arrives.
    struct LateInterrupt {
        inner: SequentialMockProvider,
        cancel: CancelFlag,
    }

    #[async_trait::async_trait]
    impl Provider for LateInterrupt {
        fn name(&self) -> &str {
            "late-interrupt"
        }

        async fn complete(
            &self,
            request: taskloom_core::provider::ProviderRequest,
        ) -> Result<taskloom_core::provider::ProviderResponse, taskloom_core::error::ProviderError> {
            self.cancel.cancel();
            self.inner.complete(request).await
        }
    }

    #[tokio::test]
    async fn interrupt_after_the_last_reply_does_not_cancel_the_next_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelFlag::new();
        let provider = Arc::new(LateInterrupt {
            inner: SequentialMockProvider::new(vec![make_text_response("first"), make_text_response("second")]),
            cancel: cancel.clone(),
        });
        let options = AppOptions {
            working_dir: dir.path().to_path_buf(),
            data_dir: Some(dir.path().join("data")),
            yolo: true,
            cancel: cancel.clone(),
            ..Default::default()
        };
        let mut app = App::new(AppConfig::default(), options, provider.clone(), None).unwrap();

        let first = app.run_prompt("one").await;
        assert_eq!(first.stop_reason, StopReason::Completed);
        assert!(!cancel.is_cancelled());

        // The next prompt reaches the model instead of stopping at once.
        let second = app.run_prompt("two").await;
        assert_eq!(second.final_response, "second");
        assert_eq!(provider.inner.call_count(), 2);
    }
}
