//! Planning session state machine.
//!
//! A session moves through a fixed transition table and is written to
//! `<context>/plan_state.json` after every change, so an interrupted
//! planning run can be picked up again from its last recorded state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use taskloom_context::{ContextStore, read_json, write_json_atomic};
use tracing::{debug, warn};

use crate::questions::QaSession;

pub const STATE_FILE: &str = "plan_state.json";

/// Where a planning session stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    #[default]
    Idle,
    Exploring,
    Synthesizing,
    Questioning,
    AwaitingAnswers,
    Refining,
    AwaitingApproval,
    Approved,
    Aborted,
}

impl PlanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Idle => "idle",
            PlanState::Exploring => "exploring",
            PlanState::Synthesizing => "synthesizing",
            PlanState::Questioning => "questioning",
            PlanState::AwaitingAnswers => "awaiting_answers",
            PlanState::Refining => "refining",
            PlanState::AwaitingApproval => "awaiting_approval",
            PlanState::Approved => "approved",
            PlanState::Aborted => "aborted",
        }
    }

    /// Whether the table allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: PlanState) -> bool {
        use PlanState::*;
        match self {
            Idle => to == Exploring,
            Exploring => matches!(to, Synthesizing | Aborted),
            Synthesizing => matches!(to, Questioning | AwaitingApproval | Aborted),
            Questioning => matches!(to, AwaitingAnswers | Aborted),
            AwaitingAnswers => matches!(to, Refining | Aborted),
            Refining => matches!(to, Questioning | AwaitingApproval | Aborted),
            AwaitingApproval => matches!(to, Approved | Refining | Aborted),
            Approved | Aborted => to == Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Approved | PlanState::Aborted)
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to resume a planning run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSession {
    pub state: PlanState,
    pub context_id: String,
    pub task: String,
    pub exploration_findings: String,
    pub plan_content: String,
    pub questions: QaSession,
    pub answers: QaSession,
    /// Completed refinement rounds
    pub iteration: u32,
    pub plan_path: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Owns the current session and persists it through the context store.
pub struct PlanStateMachine {
    session: PlanningSession,
    store: ContextStore,
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl PlanStateMachine {
    pub fn new(store: ContextStore) -> Self {
        Self {
            session: PlanningSession::default(),
            store,
        }
    }

    pub fn current_state(&self) -> PlanState {
        self.session.state
    }

    pub fn current_iteration(&self) -> u32 {
        self.session.iteration
    }

    pub fn session(&self) -> &PlanningSession {
        &self.session
    }

    /// Neither idle nor finished.
    pub fn is_active(&self) -> bool {
        self.session.state != PlanState::Idle && !self.session.state.is_terminal()
    }

    /// Waiting on the user rather than the model.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self.session.state,
            PlanState::AwaitingAnswers | PlanState::AwaitingApproval
        )
    }

    /// Begin a new session for `task`. Only valid from `Idle`.
    pub fn start(&mut self, task: &str, context_id: &str) -> bool {
        if self.session.state != PlanState::Idle {
            warn!(state = %self.session.state, "Planning session already in progress");
            return false;
        }
        let now = timestamp();
        self.session = PlanningSession {
            state: PlanState::Exploring,
            context_id: context_id.to_string(),
            task: task.to_string(),
            plan_path: self.store.plan_path(context_id).display().to_string(),
            created_at: now.clone(),
            updated_at: now,
            ..Default::default()
        };
        self.save()
    }

    /// Move to `state` if the table allows it, then persist.
    ///
    /// A rejected transition returns `false` and changes nothing.
    pub fn transition_to(&mut self, state: PlanState) -> bool {
        let from = self.session.state;
        if !from.can_transition_to(state) {
            warn!(from = %from, to = %state, "Rejected planning state transition");
            return false;
        }
        debug!(from = %from, to = %state, "Planning state transition");
        self.session.state = state;
        self.touch();
        self.save()
    }

    /// Abort an active session.
    pub fn abort(&mut self) -> bool {
        self.transition_to(PlanState::Aborted)
    }

    /// Return a finished session to `Idle` so a new one can start.
    pub fn reset(&mut self) -> bool {
        self.transition_to(PlanState::Idle)
    }

    fn touch(&mut self) {
        self.session.updated_at = timestamp();
    }

    pub fn set_exploration_findings(&mut self, findings: impl Into<String>) {
        self.session.exploration_findings = findings.into();
        self.touch();
    }

    pub fn set_plan_content(&mut self, content: impl Into<String>) {
        self.session.plan_content = content.into();
        self.touch();
    }

    pub fn set_questions(&mut self, questions: QaSession) {
        self.session.questions = questions;
        self.touch();
    }

    pub fn set_answers(&mut self, answers: QaSession) {
        self.session.answers = answers;
        self.touch();
    }

    pub fn set_plan_path(&mut self, path: impl Into<String>) {
        self.session.plan_path = path.into();
        self.touch();
    }

    pub fn increment_iteration(&mut self) {
        self.session.iteration += 1;
        self.touch();
    }

    pub fn state_path(&self) -> PathBuf {
        self.store.context_dir(&self.session.context_id).join(STATE_FILE)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.store.plan_path(&self.session.context_id)
    }

    /// Write the session atomically. Failures are logged and reported as `false`.
    pub fn save(&self) -> bool {
        match write_json_atomic(&self.state_path(), &self.session) {
            Ok(()) => true,
            Err(e) => {
                warn!(context_id = %self.session.context_id, error = %e, "Failed to save planning session");
                false
            }
        }
    }

    pub fn has_saved_session(&self, context_id: &str) -> bool {
        self.store.context_dir(context_id).join(STATE_FILE).is_file()
    }

    /// Load the saved session for `context_id`.
    ///
    /// When nothing usable is on disk, the machine is reset to an idle
    /// session for that context and `false` is returned.
    pub fn load(&mut self, context_id: &str) -> bool {
        let path = self.store.context_dir(context_id).join(STATE_FILE);
        if path.is_file() {
            match read_json::<PlanningSession>(&path) {
                Ok(mut session) => {
                    session.context_id = context_id.to_string();
                    self.session = session;
                    return true;
                }
                Err(e) => warn!(context_id, error = %e, "Ignoring unreadable planning session"),
            }
        }
        self.session = PlanningSession {
            context_id: context_id.to_string(),
            ..Default::default()
        };
        false
    }
}
