//! End-to-end planning runs against a scripted provider and a scripted user.

use std::path::Path;
use std::sync::Arc;

use taskloom_agent::{AgentDefinition, AgentRegistry, AgentSource, SubagentOrchestrator};
use taskloom_context::ContextStore;
use taskloom_core::agent::AgentConfig;
use taskloom_core::cancel::CancelFlag;
use taskloom_core::error::ProviderError;
use taskloom_core::message::Role;
use taskloom_core::provider::Provider;
use taskloom_core::testing::*;
use taskloom_core::tool::ToolRegistry;
use taskloom_workflow::{
    PlanInteraction, PlanOutcome, PlanState, PlanStateMachine, PlanningDriver, PlanningSession, QaOutcome,
    QaSession,
};

const FINDINGS: &str = "The storage layer lives in src/store.rs and has no cache.";

const PLAN_WITH_QUESTIONS: &str = "## Executive Summary\n\nAdd a read-through cache.\n\n\
## Implementation Phases\n\n1. Wrap the store.\n\n\
```json\n{\"questions\": [\
{\"id\": 1, \"text\": \"Where should cached data live?\", \"options\": [\"memory\", \"disk\"]},\
{\"id\": 2, \"text\": \"Eviction policy?\", \"options\": [\"LRU\", \"TTL\"]}]}\n```";

const REVISED_PLAN: &str = "## Executive Summary\n\nAdd an in-memory LRU cache.\n\n\
## Implementation Phases\n\n1. Wrap the store with an LRU map.";

const PLAN_WITH_FOLLOW_UP: &str = "## Executive Summary\n\nAdd an in-memory cache.\n\n\
## Implementation Phases\n\n1. Wrap the store with a map.\n\n\
```json\n{\"questions\": [\
{\"id\": 1, \"text\": \"Cache size limit?\", \"options\": [\"1000 entries\", \"unbounded\"]}]}\n```";

const PLAN_WITHOUT_QUESTIONS: &str = "## Implementation Phases\n\n1. Just do it.";

struct ScriptedUser {
    resume: bool,
    qa_outcome: QaOutcome,
    approve: bool,
    rounds: usize,
    reviewed: Vec<String>,
    /// Raise the cancel flag as the answers are submitted
    interrupt_after_answering: bool,
}

impl ScriptedUser {
    fn agreeable() -> Self {
        Self {
            resume: true,
            qa_outcome: QaOutcome::Completed,
            approve: true,
            rounds: 0,
            reviewed: Vec::new(),
            interrupt_after_answering: false,
        }
    }
}

impl PlanInteraction for ScriptedUser {
    fn confirm_resume(&mut self, _session: &PlanningSession) -> bool {
        self.resume
    }

    fn ask_questions(&mut self, qa: &mut QaSession, cancel: &CancelFlag) -> QaOutcome {
        self.rounds += 1;
        if self.qa_outcome == QaOutcome::Completed {
            for question in &mut qa.questions {
                question.select_option(0);
            }
        }
        if self.interrupt_after_answering {
            cancel.cancel();
        }
        self.qa_outcome
    }

    fn approve(&mut self, plan: &str, _cancel: &CancelFlag) -> bool {
        self.reviewed.push(plan.to_string());
        self.approve
    }
}

fn driver(provider: Arc<SequentialMockProvider>, root: &Path, agents: AgentRegistry) -> PlanningDriver {
    let config = AgentConfig::new("mock-model", root);
    let tools: Arc<ToolRegistry> = Arc::new(taskloom_tools::default_registry(&[]));
    let provider: Arc<dyn Provider> = provider;
    let orchestrator = SubagentOrchestrator::new(
        provider.clone(),
        tools.clone(),
        Arc::new(agents),
        config.clone(),
        None,
    );
    PlanningDriver::new(provider, tools, orchestrator, config)
}

fn machine(root: &Path, context_id: &str) -> PlanStateMachine {
    let mut psm = PlanStateMachine::new(ContextStore::new(root.join(".taskloom")));
    psm.load(context_id);
    psm
}

#[tokio::test]
async fn question_round_then_approval_writes_plan() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITH_QUESTIONS),
        make_text_response(REVISED_PLAN),
    ]));
    let driver = driver(provider.clone(), dir.path(), AgentRegistry::with_embedded());
    let mut user = ScriptedUser::agreeable();

    let outcome = driver.run("Add caching to the store", "ctx-1", &mut user).await;

    let PlanOutcome::Approved(path) = outcome else {
        panic!("expected approval, got {outcome:?}");
    };
    assert_eq!(user.rounds, 1);
    assert_eq!(user.reviewed, vec![REVISED_PLAN.to_string()]);

    let plan = std::fs::read_to_string(&path).unwrap();
    assert!(plan.starts_with("# Implementation Plan: Add caching to the store\n"));
    assert!(plan.contains("- Version: 2\n- Status: approved\n"));
    assert!(plan.contains("## Executive Summary\n\nAdd an in-memory LRU cache.\n"));
    assert!(plan.contains("- **Where should cached data live?**: memory\n"));
    assert!(plan.contains("- **Eviction policy?**: LRU\n"));

    let psm = machine(dir.path(), "ctx-1");
    assert_eq!(psm.current_state(), PlanState::Approved);
    assert_eq!(psm.current_iteration(), 1);
    assert_eq!(psm.session().exploration_findings, FINDINGS);
    assert_eq!(psm.session().plan_path, path.display().to_string());

    // Explorer, first draft, refinement.
    assert_eq!(provider.call_count(), 3);
    // Around the explorer, before the planner, after the Q&A.
    assert_eq!(provider.slot_clears(), 4);

    let requests = provider.requests();
    let planner_system = &requests[1].messages[0];
    assert_eq!(planner_system.role, Role::System);
    assert!(planner_system.content.starts_with("You are planning-agent, a specialized subagent."));
    assert!(requests[1].messages[1].content.contains(FINDINGS));

    // The refinement reuses the same conversation.
    let refinement = &requests[2].messages;
    assert_eq!(refinement.len(), 4);
    assert_eq!(refinement[2].content, PLAN_WITH_QUESTIONS);
    assert!(refinement[3].content.starts_with("User's design decisions:\n\nQ1: Where should cached data live?\nAnswer: memory"));
}

#[tokio::test]
async fn rejected_plan_resumes_at_approval() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITHOUT_QUESTIONS),
    ]));
    let mut user = ScriptedUser::agreeable();
    user.approve = false;

    let outcome = driver(provider, dir.path(), AgentRegistry::with_embedded())
        .run("Tidy things", "ctx-2", &mut user)
        .await;
    assert_eq!(outcome, PlanOutcome::Rejected);
    assert_eq!(user.rounds, 0);
    assert_eq!(machine(dir.path(), "ctx-2").current_state(), PlanState::AwaitingApproval);

    let idle_provider = Arc::new(SequentialMockProvider::new(vec![]));
    let mut user = ScriptedUser::agreeable();
    let outcome = driver(idle_provider.clone(), dir.path(), AgentRegistry::with_embedded())
        .run("", "ctx-2", &mut user)
        .await;

    assert!(matches!(outcome, PlanOutcome::Approved(_)));
    assert_eq!(user.reviewed, vec![PLAN_WITHOUT_QUESTIONS.to_string()]);
    assert_eq!(idle_provider.call_count(), 0);
    assert_eq!(machine(dir.path(), "ctx-2").current_state(), PlanState::Approved);
}

#[tokio::test]
async fn interrupted_questions_are_asked_again_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITH_QUESTIONS),
    ]));
    let mut user = ScriptedUser::agreeable();
    user.qa_outcome = QaOutcome::Interrupted;

    let outcome = driver(provider, dir.path(), AgentRegistry::with_embedded())
        .run("Add caching", "ctx-3", &mut user)
        .await;
    assert_eq!(outcome, PlanOutcome::Interrupted);

    let saved = machine(dir.path(), "ctx-3");
    assert_eq!(saved.current_state(), PlanState::AwaitingAnswers);
    assert_eq!(saved.session().questions.len(), 2);

    let resumed_provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(REVISED_PLAN)]));
    let mut user = ScriptedUser::agreeable();
    let outcome = driver(resumed_provider.clone(), dir.path(), AgentRegistry::with_embedded())
        .run("", "ctx-3", &mut user)
        .await;

    assert!(matches!(outcome, PlanOutcome::Approved(_)));
    assert_eq!(user.rounds, 1);
    assert_eq!(user.reviewed, vec![REVISED_PLAN.to_string()]);

    let request = &resumed_provider.requests()[0];
    let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert!(request.messages[1].content.contains(FINDINGS));
}

#[tokio::test]
async fn declining_resume_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITHOUT_QUESTIONS),
    ]));
    let mut user = ScriptedUser::agreeable();
    user.approve = false;
    driver(provider, dir.path(), AgentRegistry::with_embedded())
        .run("First idea", "ctx-4", &mut user)
        .await;

    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITHOUT_QUESTIONS),
    ]));
    let mut user = ScriptedUser::agreeable();
    user.resume = false;
    let outcome = driver(provider.clone(), dir.path(), AgentRegistry::with_embedded())
        .run("Second idea", "ctx-4", &mut user)
        .await;

    assert!(matches!(outcome, PlanOutcome::Approved(_)));
    assert_eq!(provider.call_count(), 2);
    assert_eq!(machine(dir.path(), "ctx-4").session().task, "Second idea");
}

#[tokio::test]
async fn aborting_questions_aborts_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITH_QUESTIONS),
    ]));
    let mut user = ScriptedUser::agreeable();
    user.qa_outcome = QaOutcome::Aborted;

    let outcome = driver(provider, dir.path(), AgentRegistry::with_embedded())
        .run("Add caching", "ctx-5", &mut user)
        .await;

    assert_eq!(outcome, PlanOutcome::Aborted);
    assert!(user.reviewed.is_empty());
    assert_eq!(machine(dir.path(), "ctx-5").current_state(), PlanState::Aborted);
}

#[tokio::test]
async fn failed_exploration_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::with_results(vec![Err(
        ProviderError::Network("connection refused".into()),
    )]));
    let mut user = ScriptedUser::agreeable();

    let outcome = driver(provider, dir.path(), AgentRegistry::with_embedded())
        .run("Add caching", "ctx-6", &mut user)
        .await;

    let PlanOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.starts_with("Exploration failed"));
    assert_eq!(machine(dir.path(), "ctx-6").current_state(), PlanState::Aborted);
}

#[tokio::test]
async fn missing_agents_or_task_fail_without_completions() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![]));
    let mut user = ScriptedUser::agreeable();

    let outcome = driver(provider.clone(), dir.path(), AgentRegistry::new())
        .run("Add caching", "ctx-7", &mut user)
        .await;
    assert_eq!(outcome, PlanOutcome::Failed("explorer-agent not found".into()));

    let outcome = driver(provider.clone(), dir.path(), AgentRegistry::with_embedded())
        .run("   ", "ctx-7", &mut user)
        .await;
    assert_eq!(outcome, PlanOutcome::Failed("a task description is required".into()));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn follow_up_questions_start_another_round() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITH_QUESTIONS),
        make_text_response(PLAN_WITH_FOLLOW_UP),
        make_text_response(REVISED_PLAN),
    ]));
    let mut user = ScriptedUser::agreeable();

    let outcome = driver(provider.clone(), dir.path(), AgentRegistry::with_embedded())
        .run("Add caching to the store", "ctx-8", &mut user)
        .await;

    let PlanOutcome::Approved(path) = outcome else {
        panic!("expected approval, got {outcome:?}");
    };
    assert_eq!(user.rounds, 2);
    assert_eq!(user.reviewed, vec![REVISED_PLAN.to_string()]);

    let plan = std::fs::read_to_string(&path).unwrap();
    assert!(plan.contains("- Version: 3\n"));
    assert!(plan.contains("- **Where should cached data live?**: memory\n"));
    assert!(plan.contains("- **Cache size limit?**: 1000 entries\n"));

    let psm = machine(dir.path(), "ctx-8");
    assert_eq!(psm.current_iteration(), 2);
    assert_eq!(psm.session().answers.len(), 3);

    // Both refinements continue the same planner conversation.
    assert_eq!(provider.call_count(), 4);
    let second_refinement = &provider.requests()[3].messages;
    assert_eq!(second_refinement.len(), 6);
    assert!(second_refinement[5].content.contains("Cache size limit?"));
}

#[tokio::test]
async fn saved_refining_session_resumes_at_approval() {
    let dir = tempfile::tempdir().unwrap();
    let mut psm = PlanStateMachine::new(ContextStore::new(dir.path().join(".taskloom")));
    assert!(psm.start("Add caching", "ctx-9"));
    for state in [
        PlanState::Synthesizing,
        PlanState::Questioning,
        PlanState::AwaitingAnswers,
        PlanState::Refining,
    ] {
        assert!(psm.transition_to(state));
    }
    psm.set_plan_content(REVISED_PLAN);
    assert!(psm.save());

    let provider = Arc::new(SequentialMockProvider::new(vec![]));
    let mut user = ScriptedUser::agreeable();
    let outcome = driver(provider.clone(), dir.path(), AgentRegistry::with_embedded())
        .run("", "ctx-9", &mut user)
        .await;

    assert!(matches!(outcome, PlanOutcome::Approved(_)), "{outcome:?}");
    assert_eq!(user.rounds, 0);
    assert_eq!(user.reviewed, vec![REVISED_PLAN.to_string()]);
    assert_eq!(provider.call_count(), 0);
    assert_eq!(machine(dir.path(), "ctx-9").current_state(), PlanState::Approved);
}

#[tokio::test]
async fn cancelled_refinement_is_interrupted_and_resumable() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITH_QUESTIONS),
    ]));
    let mut user = ScriptedUser::agreeable();
    user.interrupt_after_answering = true;

    let cancel = CancelFlag::new();
    let outcome = driver(provider.clone(), dir.path(), AgentRegistry::with_embedded())
        .with_cancel(cancel.clone())
        .run("Add caching", "ctx-10", &mut user)
        .await;

    assert_eq!(outcome, PlanOutcome::Interrupted);
    assert!(cancel.is_cancelled());
    // The refinement never reached the model.
    assert_eq!(provider.call_count(), 2);
    assert!(user.reviewed.is_empty());

    let saved = machine(dir.path(), "ctx-10");
    assert_eq!(saved.current_state(), PlanState::Refining);
    assert_eq!(saved.session().answers.len(), 2);

    let mut user = ScriptedUser::agreeable();
    let outcome = driver(Arc::new(SequentialMockProvider::new(vec![])), dir.path(), AgentRegistry::with_embedded())
        .run("", "ctx-10", &mut user)
        .await;
    assert!(matches!(outcome, PlanOutcome::Approved(_)), "{outcome:?}");
    assert_eq!(user.rounds, 0);
    assert!(user.reviewed[0].starts_with("## Executive Summary\n\nAdd a read-through cache."));
    assert!(!user.reviewed[0].contains("```json"));
}

#[tokio::test]
async fn refinement_at_iteration_cap_keeps_the_draft_for_approval() {
    let dir = tempfile::tempdir().unwrap();
    let mut agents = AgentRegistry::with_embedded();
    agents.insert(
        AgentDefinition::parse(
            "---\nname: planning-agent\ndescription: Plans in a single tool round\n\
             allowed-tools: read_plan\nmax-iterations: 1\n---\nWrite plans.\n",
            AgentSource::Embedded,
        )
        .unwrap(),
    );
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITH_QUESTIONS),
        make_tool_call_response(vec![make_tool_call("read_plan", serde_json::json!({}))], "Checking the old plan."),
    ]));
    let mut user = ScriptedUser::agreeable();

    let outcome = driver(provider.clone(), dir.path(), agents)
        .run("Add caching", "ctx-11", &mut user)
        .await;

    assert!(matches!(outcome, PlanOutcome::Approved(_)), "{outcome:?}");
    assert_eq!(user.rounds, 1);
    assert_eq!(provider.call_count(), 3);
    assert_eq!(user.reviewed.len(), 1);
    assert!(user.reviewed[0].starts_with("## Executive Summary\n\nAdd a read-through cache."));

    let psm = machine(dir.path(), "ctx-11");
    assert_eq!(psm.current_state(), PlanState::Approved);
    assert_eq!(psm.session().answers.len(), 2);
}

#[tokio::test]
async fn failed_plan_write_leaves_the_session_awaiting_approval() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContextStore::new(dir.path().join(".taskloom"));
    // A directory where the plan file belongs makes the final write fail.
    std::fs::create_dir_all(store.plan_path("ctx-12").join("occupied")).unwrap();

    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_text_response(FINDINGS),
        make_text_response(PLAN_WITHOUT_QUESTIONS),
    ]));
    let mut user = ScriptedUser::agreeable();

    let outcome = driver(provider, dir.path(), AgentRegistry::with_embedded())
        .run("Tidy things", "ctx-12", &mut user)
        .await;

    let PlanOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.starts_with("Failed to write plan"));
    assert_eq!(machine(dir.path(), "ctx-12").current_state(), PlanState::AwaitingApproval);
}
