//! Drives a planning session from exploration through approval.
//!
//! The explorer runs once as an ordinary subagent. The planning agent is a
//! single [`AgentLoop`] kept alive across every Q&A round, so each round is
//! a continuation turn rather than a rebuilt prompt.

use std::path::PathBuf;
use std::sync::Arc;

use taskloom_agent::{AgentDefinition, AgentLoop, SubagentOrchestrator, generate_system_prompt};
use taskloom_context::ContextStore;
use taskloom_core::agent::{AgentConfig, StopReason};
use taskloom_core::cancel::CancelFlag;
use taskloom_core::message::Message;
use taskloom_core::permission::PermissionPolicy;
use taskloom_core::provider::Provider;
use taskloom_core::subagent::{SubagentRequest, SubagentSpawner};
use taskloom_core::tool::ToolRegistry;
use tracing::{info, warn};

use crate::extract::{extract_plan_content, extract_questions};
use crate::format::{PlanData, extract_section, generate, replace_section};
use crate::questions::{QaOutcome, QaSession};
use crate::state::{PlanState, PlanStateMachine, PlanningSession};

pub const EXPLORER_AGENT: &str = "explorer-agent";
pub const PLANNING_AGENT: &str = "planning-agent";

const SUMMARY_HEADER: &str = "## Executive Summary";

/// The user-facing half of planning. Implemented by the terminal UI and
/// by scripted fakes in tests.
pub trait PlanInteraction: Send {
    /// Called when an unfinished session exists for the context.
    fn confirm_resume(&mut self, _session: &PlanningSession) -> bool {
        true
    }

    /// Collect answers in place. Must return `Interrupted` promptly once
    /// `cancel` is raised.
    fn ask_questions(&mut self, qa: &mut QaSession, cancel: &CancelFlag) -> QaOutcome;

    /// Show the plan and ask for approval.
    fn approve(&mut self, plan: &str, cancel: &CancelFlag) -> bool;

    fn progress(&mut self, _message: &str) {}
}

/// How a planning run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// The plan was written to this path
    Approved(PathBuf),
    /// The user declined; the session stays resumable
    Rejected,
    Aborted,
    /// Cancelled mid-run; the session stays resumable
    Interrupted,
    Failed(String),
}

pub struct PlanningDriver {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    orchestrator: Arc<SubagentOrchestrator>,
    base_config: AgentConfig,
    permissions: Option<Arc<dyn PermissionPolicy>>,
    store: ContextStore,
    cancel: CancelFlag,
}

impl PlanningDriver {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        orchestrator: Arc<SubagentOrchestrator>,
        base_config: AgentConfig,
    ) -> Self {
        let store = ContextStore::new(base_config.context_base_path.clone());
        Self {
            provider,
            tools,
            orchestrator,
            base_config,
            permissions: None,
            store,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionPolicy>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Plan `task` in `context_id`, offering to resume an unfinished session first.
    pub async fn run(&self, task: &str, context_id: &str, ui: &mut dyn PlanInteraction) -> PlanOutcome {
        for name in [EXPLORER_AGENT, PLANNING_AGENT] {
            if self.orchestrator.agents().get(name).is_none() {
                return PlanOutcome::Failed(format!("{name} not found"));
            }
        }

        let mut psm = PlanStateMachine::new(self.store.clone());
        if psm.has_saved_session(context_id) && psm.load(context_id) && psm.is_active() {
            if ui.confirm_resume(psm.session()) {
                return self.resume(&mut psm, ui).await;
            }
            psm.abort();
        }

        let task = task.trim();
        if task.is_empty() {
            return PlanOutcome::Failed("a task description is required".into());
        }
        self.start_fresh(&mut psm, task, context_id, ui).await
    }

    async fn start_fresh(
        &self,
        psm: &mut PlanStateMachine,
        task: &str,
        context_id: &str,
        ui: &mut dyn PlanInteraction,
    ) -> PlanOutcome {
        if psm.current_state().is_terminal() {
            psm.reset();
        }
        psm.start(task, context_id);
        if psm.current_state() != PlanState::Exploring {
            return PlanOutcome::Failed("could not start a planning session".into());
        }
        self.explore_and_plan(psm, ui).await
    }

    /// Re-enter the workflow at the step implied by the saved state.
    async fn resume(&self, psm: &mut PlanStateMachine, ui: &mut dyn PlanInteraction) -> PlanOutcome {
        let session = psm.session().clone();
        info!(context_id = %session.context_id, state = %session.state, "Resuming planning session");
        ui.progress(&format!("Resuming planning session from state: {}", session.state));

        match session.state {
            PlanState::Exploring | PlanState::Synthesizing => {
                psm.abort();
                self.start_fresh(psm, &session.task, &session.context_id, ui).await
            }
            PlanState::Questioning | PlanState::AwaitingAnswers => {
                if session.state == PlanState::Questioning {
                    psm.transition_to(PlanState::AwaitingAnswers);
                }
                if session.questions.is_empty() {
                    psm.transition_to(PlanState::Refining);
                    return self.approval(psm, ui).await;
                }
                let Some(definition) = self.planning_definition() else {
                    return PlanOutcome::Failed(format!("{PLANNING_AGENT} not found"));
                };
                let mut planner = self.planner(&definition, &session.context_id);
                planner.set_messages(vec![
                    Message::system(generate_system_prompt(&definition, &self.tools)),
                    Message::user(planning_prompt(&session.task, &session.exploration_findings)),
                    Message::assistant(session.plan_content.clone()),
                ]);
                self.provider.clear_slot().await;

                let next = match self.answer_round(psm, &mut planner, session.questions, ui).await {
                    Ok(next) => next,
                    Err(outcome) => return outcome,
                };
                if let Err(outcome) = self.refine_until_settled(psm, &mut planner, next, ui).await {
                    return outcome;
                }
                self.provider.clear_slot().await;
                self.approval(psm, ui).await
            }
            PlanState::Refining | PlanState::AwaitingApproval => self.approval(psm, ui).await,
            PlanState::Approved => PlanOutcome::Approved(PathBuf::from(session.plan_path)),
            PlanState::Idle | PlanState::Aborted => {
                self.start_fresh(psm, &session.task, &session.context_id, ui).await
            }
        }
    }

    fn planning_definition(&self) -> Option<AgentDefinition> {
        self.orchestrator.agents().get(PLANNING_AGENT).cloned()
    }

    /// The persistent planning loop for one session.
    fn planner(&self, definition: &AgentDefinition, context_id: &str) -> AgentLoop {
        let mut config = self.base_config.clone();
        config.custom_system_prompt = Some(generate_system_prompt(definition, &self.tools));
        config.allowed_tools = Some(definition.allowed_tools.clone());
        config.max_iterations = definition.max_iterations;
        config.skip_tool_table = true;
        config.prompt_appendix = None;
        config.context_id = Some(context_id.to_string());
        config.spawn_depth = 1;

        let spawner: Arc<dyn SubagentSpawner> = self.orchestrator.clone();
        let mut planner = AgentLoop::new(self.provider.clone(), self.tools.clone(), config)
            .with_spawner(spawner)
            .with_cancel(self.cancel.clone());
        if let Some(permissions) = &self.permissions {
            planner = planner.with_permissions(permissions.clone());
        }
        planner
    }

    /// Exploring through to the approval prompt.
    async fn explore_and_plan(&self, psm: &mut PlanStateMachine, ui: &mut dyn PlanInteraction) -> PlanOutcome {
        let session = psm.session().clone();

        ui.progress("Exploring the codebase...");
        let exploration = self
            .orchestrator
            .spawn(
                SubagentRequest {
                    agent_name: EXPLORER_AGENT.into(),
                    task: exploration_prompt(&session.task),
                    ..Default::default()
                },
                &self.cancel,
            )
            .await;
        if !exploration.success {
            if self.cancel.is_cancelled() {
                psm.save();
                return PlanOutcome::Interrupted;
            }
            let reason = exploration.error.unwrap_or_else(|| "exploration failed".into());
            warn!(context_id = %session.context_id, error = %reason, "Exploration failed");
            psm.abort();
            return PlanOutcome::Failed(format!("Exploration failed: {reason}"));
        }
        psm.set_exploration_findings(exploration.output.clone());
        psm.transition_to(PlanState::Synthesizing);

        let Some(definition) = self.planning_definition() else {
            psm.abort();
            return PlanOutcome::Failed(format!("{PLANNING_AGENT} not found"));
        };

        ui.progress("Drafting the plan...");
        let mut planner = self.planner(&definition, &session.context_id);
        self.provider.clear_slot().await;
        let result = planner
            .run(&planning_prompt(&session.task, &exploration.output))
            .await;
        match result.stop_reason {
            StopReason::Completed => {}
            StopReason::UserCancelled => {
                psm.save();
                return PlanOutcome::Interrupted;
            }
            other => {
                psm.abort();
                return PlanOutcome::Failed(format!("Planning agent stopped: {other:?}"));
            }
        }

        psm.set_plan_content(extract_plan_content(&result.final_response));
        psm.save();
        let questions = extract_questions(&result.final_response);

        if let Err(outcome) = self.refine_until_settled(psm, &mut planner, questions, ui).await {
            return outcome;
        }
        self.provider.clear_slot().await;
        self.approval(psm, ui).await
    }

    /// Ask and refine until the planner stops producing questions.
    async fn refine_until_settled(
        &self,
        psm: &mut PlanStateMachine,
        planner: &mut AgentLoop,
        mut questions: QaSession,
        ui: &mut dyn PlanInteraction,
    ) -> Result<(), PlanOutcome> {
        while !questions.is_empty() {
            psm.transition_to(PlanState::Questioning);
            psm.set_questions(questions.clone());
            psm.save();
            psm.transition_to(PlanState::AwaitingAnswers);
            questions = self.answer_round(psm, planner, questions, ui).await?;
        }
        Ok(())
    }

    /// One Q&A exchange from `AwaitingAnswers`: collect answers, feed them to
    /// the planner, and return its follow-up questions.
    async fn answer_round(
        &self,
        psm: &mut PlanStateMachine,
        planner: &mut AgentLoop,
        mut questions: QaSession,
        ui: &mut dyn PlanInteraction,
    ) -> Result<QaSession, PlanOutcome> {
        match ui.ask_questions(&mut questions, &self.cancel) {
            QaOutcome::Completed => {}
            QaOutcome::Aborted => {
                psm.abort();
                return Err(PlanOutcome::Aborted);
            }
            QaOutcome::Interrupted => {
                psm.set_questions(questions);
                psm.save();
                return Err(PlanOutcome::Interrupted);
            }
        }

        psm.set_questions(questions.clone());
        let mut answers = psm.session().answers.clone();
        answers.questions.extend(questions.questions.iter().cloned());
        psm.set_answers(answers);
        psm.transition_to(PlanState::Refining);
        psm.increment_iteration();
        psm.save();

        ui.progress("Refining the plan...");
        let continuation = format!(
            "{}\n\nRevise the plan to reflect these decisions. If anything important is still undecided, ask follow-up questions in the same JSON format.",
            questions.format_answers().trim_end()
        );
        let result = planner.run(&continuation).await;
        match result.stop_reason {
            StopReason::Completed => {
                let plan = extract_plan_content(&result.final_response);
                if !plan.is_empty() {
                    psm.set_plan_content(plan);
                }
                psm.save();
                Ok(extract_questions(&result.final_response))
            }
            StopReason::UserCancelled => {
                psm.save();
                Err(PlanOutcome::Interrupted)
            }
            other => {
                warn!(stop_reason = ?other, "Refinement stopped early, keeping the current plan");
                Ok(QaSession::default())
            }
        }
    }

    /// Present the plan and write it out once approved.
    async fn approval(&self, psm: &mut PlanStateMachine, ui: &mut dyn PlanInteraction) -> PlanOutcome {
        if psm.current_state() != PlanState::AwaitingApproval
            && !psm.transition_to(PlanState::AwaitingApproval)
        {
            return PlanOutcome::Failed(format!(
                "cannot request approval from state {}",
                psm.current_state()
            ));
        }

        let session = psm.session().clone();
        if !ui.approve(&session.plan_content, &self.cancel) {
            psm.save();
            return if self.cancel.is_cancelled() {
                PlanOutcome::Interrupted
            } else {
                PlanOutcome::Rejected
            };
        }

        // The session only records `Approved` once the plan is on disk.
        let document = render_plan(&session, "approved");
        let path = match self.store.save_plan(&session.context_id, &document) {
            Ok(path) => path,
            Err(e) => {
                warn!(context_id = %session.context_id, error = %e, "Failed to write plan");
                return PlanOutcome::Failed(format!("Failed to write plan: {e}"));
            }
        };
        psm.set_plan_path(path.display().to_string());
        psm.transition_to(PlanState::Approved);
        info!(context_id = %session.context_id, path = %path.display(), "Plan approved");
        PlanOutcome::Approved(path)
    }
}

/// The final `plan.md` for a session.
pub fn render_plan(session: &PlanningSession, status: &str) -> String {
    let plan = session.plan_content.trim();
    let executive_summary = extract_section(plan, SUMMARY_HEADER)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let body = if executive_summary.is_empty() {
        plan.to_string()
    } else {
        replace_section(plan, SUMMARY_HEADER, "").trim().to_string()
    };

    generate(&PlanData {
        task_summary: task_summary(&session.task),
        created_at: session.created_at.clone(),
        version: session.iteration + 1,
        status: status.to_string(),
        executive_summary,
        design_decisions: session
            .answers
            .questions
            .iter()
            .filter(|q| q.is_answered())
            .map(|q| (q.text.clone(), q.selected_answer.clone()))
            .collect(),
        plan_body: body,
    })
}

fn task_summary(task: &str) -> String {
    let line = task.lines().next().unwrap_or_default().trim();
    if line.chars().count() > 80 {
        let cut: String = line.chars().take(77).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

fn exploration_prompt(task: &str) -> String {
    format!(
        "## Task Being Planned\n\n{task}\n\n\
         ## Your Job\n\n\
         Survey the parts of the codebase this task touches. Read, do not modify.\n\n\
         ## Report Back\n\n\
         - The components and files involved, and how they connect\n\
         - Conventions and patterns a change here should follow\n\
         - Constraints or risks the plan has to account for\n"
    )
}

fn planning_prompt(task: &str, findings: &str) -> String {
    format!(
        "## Task\n\n{task}\n\n\
         ## Codebase Findings\n\n{findings}\n\n\
         ## What to Produce\n\n\
         Write an implementation plan in markdown with an executive summary, phased steps naming \
         the files to change, risks, and success criteria. If design choices need the user's input, \
         end with a fenced json block of 5 to 7 questions shaped as \
         {{\"questions\": [{{\"id\": 1, \"text\": \"...\", \"options\": [\"...\", \"...\"]}}]}}. \
         Leave the block out when nothing needs deciding.\n"
    )
}
