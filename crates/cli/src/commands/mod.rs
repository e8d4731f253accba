//! Slash commands typed at the REPL prompt.
//!
//! Commands:
//! - `/exit`              leave the session
//! - `/clear`             start a new context
//! - `/list`              list saved contexts
//! - `/switch <id>`       load a saved context
//! - `/delete <id>`       remove a saved context
//! - `/compact [req]`     summarize and archive the conversation
//! - `/plan <task>`       run the planning workflow
//! - `/stats`             token usage of this session
//! - `/tools`             registered tools
//! - `/subagents`         discovered agents
//! - `/help`              command overview

use std::io::Write;

use taskloom_workflow::PlanInteraction;

use crate::app::App;

mod compact;
mod context;
mod info;
mod plan;

pub use info::HELP;

/// What the REPL should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue,
    Exit,
}

/// True when the line should be handled here instead of sent to the model.
pub fn is_command(line: &str) -> bool {
    line.trim_start().starts_with('/')
}

/// Run one slash command. Only write failures on `out` are errors; store
/// and workflow problems are reported to the user and the session goes on.
pub async fn dispatch(
    app: &mut App,
    line: &str,
    ui: &mut dyn PlanInteraction,
    out: &mut dyn Write,
) -> anyhow::Result<CommandOutcome> {
    let line = line.trim();
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    tracing::debug!(command = name, "Dispatching command");

    match name {
        "/exit" | "/quit" => return Ok(CommandOutcome::Exit),
        "/clear" => context::clear(app, out)?,
        "/list" => context::list(app, out)?,
        "/switch" => context::switch(app, rest, out)?,
        "/delete" => context::delete(app, rest, out)?,
        "/compact" => compact::run(app, (!rest.is_empty()).then_some(rest), out).await?,
        "/plan" => plan::run(app, rest, ui, out).await?,
        "/stats" => info::stats(app, out)?,
        "/tools" => info::tools(app, out)?,
        "/subagents" => info::subagents(app, out)?,
        "/help" => writeln!(out, "{HELP}")?,
        other => writeln!(out, "Unknown command: {other}. Type /help for the list.")?,
    }
    Ok(CommandOutcome::Continue)
}

/// The first eight characters of a context id, as shown to the user.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
