//! Planning workflow: explore, draft, ask, refine, approve.
//!
//! A [`PlanStateMachine`] records where a session stands and persists it
//! after every change. The [`PlanningDriver`] walks that machine using the
//! explorer and planning agents, and hands every user-facing step to a
//! [`PlanInteraction`] implementation.

pub mod driver;
pub mod extract;
pub mod format;
pub mod questions;
pub mod state;

pub use driver::{PlanInteraction, PlanOutcome, PlanningDriver, render_plan};
pub use extract::{extract_plan_content, extract_questions};
pub use format::PlanData;
pub use questions::{PlanQuestion, QaOutcome, QaSession};
pub use state::{PlanState, PlanStateMachine, PlanningSession};
