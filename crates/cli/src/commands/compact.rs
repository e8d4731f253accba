//! `/compact [requirements]`.

use std::io::Write;

use taskloom_core::message::Role;

use crate::app::App;

pub(super) async fn run(app: &mut App, requirements: Option<&str>, out: &mut dyn Write) -> anyhow::Result<()> {
    let messages = app.agent().get_messages().to_vec();
    if !messages.iter().any(|m| m.role == Role::User) {
        writeln!(out, "Nothing to compact.")?;
        return Ok(());
    }

    app.persist();
    writeln!(out, "Compacting {} messages...", messages.len())?;
    out.flush()?;

    let compactor = app.compactor();
    let cancel = app.cancel().clone();
    let result = compactor
        .compact(app.store(), app.context_id(), &messages, requirements, &cancel)
        .await;
    if cancel.is_cancelled() {
        cancel.reset();
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            writeln!(out, "Compaction failed: {e}")?;
            return Ok(());
        }
    };

    // The stored record starts at the summary; the live loop keeps its
    // original system prompt in front so tools stay described.
    let mut live = Vec::with_capacity(outcome.messages.len() + 1);
    if let Some(prompt) = messages.first().filter(|m| m.role == Role::System) {
        live.push(prompt.clone());
    }
    live.extend(outcome.messages);
    app.agent_mut().set_messages(live);

    if !outcome.model_summary {
        writeln!(out, "The model did not produce a summary; kept the extracted facts only.")?;
    }
    writeln!(
        out,
        "Compacted {} messages. Archive: {}",
        outcome.archive.message_count, outcome.archive.archive
    )?;
    Ok(())
}
