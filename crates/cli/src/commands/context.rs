//! `/clear`, `/list`, `/switch` and `/delete`.

use std::io::Write;

use taskloom_context::PrefixMatch;

use super::short_id;
use crate::app::App;

pub(super) fn clear(app: &mut App, out: &mut dyn Write) -> anyhow::Result<()> {
    app.persist();
    match app.new_context() {
        Ok(id) => writeln!(out, "Conversation cleared. New context: {}", short_id(id))?,
        Err(e) => writeln!(out, "Failed to start a new context: {e:#}")?,
    }
    Ok(())
}

pub(super) fn list(app: &App, out: &mut dyn Write) -> anyhow::Result<()> {
    let contexts = app.store().list();
    if contexts.is_empty() {
        writeln!(out, "No saved contexts.")?;
        return Ok(());
    }

    writeln!(out, "Saved contexts:")?;
    for summary in &contexts {
        let marker = if summary.id == app.context_id() { " *" } else { "" };
        writeln!(
            out,
            "  {}{}  [{} msgs]  {}",
            short_id(&summary.id),
            marker,
            summary.message_count,
            summary.preview
        )?;
    }
    writeln!(out, "\n  * = current context")?;
    Ok(())
}

/// Expand an id prefix, telling the user when it does not pick exactly one.
fn resolve(app: &App, prefix: &str, out: &mut dyn Write) -> anyhow::Result<Option<String>> {
    if prefix.is_empty() {
        writeln!(out, "No context ID specified.")?;
        return Ok(None);
    }
    match app.store().resolve_prefix(prefix) {
        PrefixMatch::One(id) => Ok(Some(id)),
        PrefixMatch::None => {
            writeln!(out, "No context matches '{prefix}'.")?;
            Ok(None)
        }
        PrefixMatch::Many => {
            writeln!(out, "'{prefix}' matches more than one context. Type more of the ID.")?;
            Ok(None)
        }
    }
}

pub(super) fn switch(app: &mut App, prefix: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let Some(id) = resolve(app, prefix, out)? else {
        return Ok(());
    };
    if id == app.context_id() {
        writeln!(out, "Already in context {}", short_id(&id))?;
        return Ok(());
    }

    app.persist();
    match app.switch_context(&id) {
        Ok(count) => writeln!(out, "Switched to context {} ({count} messages)", short_id(&id))?,
        Err(e) => writeln!(out, "Failed to load context {}: {e:#}", short_id(&id))?,
    }
    Ok(())
}

pub(super) fn delete(app: &mut App, prefix: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let Some(id) = resolve(app, prefix, out)? else {
        return Ok(());
    };
    if id == app.context_id() {
        writeln!(out, "Cannot delete current context. Use /clear first.")?;
        return Ok(());
    }

    match app.store().delete(&id) {
        Ok(true) => writeln!(out, "Deleted context {}", short_id(&id))?,
        Ok(false) => writeln!(out, "Context {} no longer exists.", short_id(&id))?,
        Err(e) => writeln!(out, "Failed to delete context {}: {e}", short_id(&id))?,
    }
    Ok(())
}
