//! `/stats`, `/tools`, `/subagents` and `/help`.

use std::io::Write;

use taskloom_agent::{AgentSource, default_search_paths};
use taskloom_agent::prompt::short_description;

use crate::app::App;

pub const HELP: &str = "\
Commands:
  /clear              Start a new conversation context
  /list               List saved contexts
  /switch <id>        Switch to a saved context (ID prefix is enough)
  /delete <id>        Delete a saved context
  /compact [req]      Summarize and archive the conversation
  /plan <task>        Explore, plan and review a task before touching code
  /stats              Token usage for this session
  /tools              Registered tools
  /subagents          Agents available to spawn_agent
  /help               This list
  /exit               Quit

Ctrl+C cancels the running request; press it twice while idle to quit.";

pub(super) fn stats(app: &App, out: &mut dyn Write) -> anyhow::Result<()> {
    let stats = app.agent().get_stats();

    writeln!(out, "Session statistics:")?;
    writeln!(out, "  Prompt tokens:  {}", stats.total_input)?;
    writeln!(out, "  Output tokens:  {}", stats.total_output)?;
    if stats.total_cached > 0 {
        writeln!(out, "  Cached tokens:  {}", stats.total_cached)?;
    }
    writeln!(out, "  Total tokens:   {}", stats.total_tokens())?;
    if stats.current_context_tokens > 0 {
        writeln!(out, "  Context size:   {} tokens", stats.current_context_tokens)?;
    }
    if stats.total_prompt_ms > 0.0 {
        writeln!(out, "  Prompt time:    {:.2}s", stats.total_prompt_ms / 1000.0)?;
    }
    if stats.total_predicted_ms > 0.0 {
        writeln!(out, "  Gen time:       {:.2}s", stats.total_predicted_ms / 1000.0)?;
    }
    if let Some(speed) = stats.tokens_per_second() {
        writeln!(out, "  Avg speed:      {speed:.1} tok/s")?;
    }
    Ok(())
}

pub(super) fn tools(app: &App, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "Available tools:")?;
    for tool in app.tools().iter() {
        writeln!(out, "  {}:\n    {}", tool.name(), short_description(tool.description()))?;
    }
    Ok(())
}

pub(super) fn subagents(app: &App, out: &mut dyn Write) -> anyhow::Result<()> {
    let agents = app.agents();
    if agents.is_empty() {
        writeln!(out, "No agents found. Searched:")?;
        for path in default_search_paths(app.data_dir(), app.working_dir()) {
            writeln!(out, "  {}", path.display())?;
        }
        return Ok(());
    }

    writeln!(out, "Available agents:")?;
    for agent in agents.iter() {
        writeln!(out, "\n  {}", agent.name)?;
        writeln!(out, "    {}", agent.description)?;
        if !agent.allowed_tools.is_empty() {
            writeln!(out, "    Tools: {}", agent.allowed_tools.join(", "))?;
        }
        writeln!(out, "    Max iterations: {}", agent.max_iterations)?;
        match &agent.source {
            AgentSource::Embedded => writeln!(out, "    Source: built-in")?,
            AgentSource::File(path) => writeln!(out, "    Source: {}", path.display())?,
        }
    }
    Ok(())
}
