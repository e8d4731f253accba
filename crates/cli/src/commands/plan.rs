//! `/plan <task>`: explore, draft, ask, refine, approve.

use std::io::Write;

use taskloom_workflow::{PlanInteraction, PlanOutcome};

use super::short_id;
use crate::app::App;

pub(super) async fn run(
    app: &mut App,
    task: &str,
    ui: &mut dyn PlanInteraction,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    app.persist();
    let context_id = app.context_id().to_string();
    let driver = app.planning_driver();

    if !task.is_empty() {
        writeln!(out, "\nStarting planning workflow for: {task}\n")?;
        out.flush()?;
    }

    let outcome = driver.run(task, &context_id, ui).await;
    tracing::info!(context_id = %context_id, outcome = ?outcome, "Planning finished");

    match outcome {
        PlanOutcome::Approved(path) => {
            writeln!(out, "\nPlan approved and saved to: {}", path.display())?;
            writeln!(out, "Context ID: {}", short_id(&context_id))?;
            writeln!(out, "\nTo carry it out, ask the agent to read the plan and implement it phase by phase.")?;
            writeln!(out, "The read_plan tool finds it without arguments.")?;
        }
        PlanOutcome::Rejected => {
            writeln!(out, "\nPlan not approved. The session is saved; run /plan to pick it up again.")?;
        }
        PlanOutcome::Aborted => writeln!(out, "\nPlanning aborted.")?,
        PlanOutcome::Interrupted => {
            writeln!(out, "\nPlanning interrupted. Run /plan to resume where it stopped.")?;
        }
        PlanOutcome::Failed(reason) => {
            writeln!(out, "Planning failed: {reason}")?;
            if task.is_empty() {
                writeln!(out, "Usage: /plan <task description>")?;
            }
        }
    }

    if app.cancel().is_cancelled() {
        app.cancel().reset();
    }
    Ok(())
}
