//! The interactive read-eval-print loop.

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use taskloom_agent::MessageCallback;
use taskloom_core::agent::StopReason;
use taskloom_core::cancel::CancelFlag;
use taskloom_core::message::{Message, Role};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::{App, stop_line};
use crate::commands::{self, CommandOutcome};
use crate::qa_ui::TerminalQa;

const TOOL_ARGS_PREVIEW: usize = 120;
const TOOL_ERROR_PREVIEW: usize = 200;

fn clip(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// One-line rendering of a message as it is added to the conversation.
/// `None` for messages the user does not need to see.
pub fn echo_line(message: &Message) -> Option<String> {
    match message.role {
        Role::Assistant => {
            let mut out = String::new();
            if !message.content.trim().is_empty() {
                out.push_str(message.content.trim_end());
            }
            for call in &message.tool_calls {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("  > {}({})", call.name, clip(&call.arguments, TOOL_ARGS_PREVIEW)));
            }
            (!out.is_empty()).then_some(out)
        }
        Role::Tool if message.content.starts_with("Error:") => {
            Some(format!("    {}", clip(&message.content, TOOL_ERROR_PREVIEW)))
        }
        _ => None,
    }
}

fn echo_callback() -> MessageCallback {
    Arc::new(|message: &Message| {
        if let Some(line) = echo_line(message) {
            println!("{line}");
        }
    })
}

/// Await `fut` while a Ctrl-C raises `cancel`.
async fn interruptible<F: Future>(cancel: &CancelFlag, fut: F) -> F::Output {
    let flag = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.cancel();
        }
    });
    let output = fut.await;
    watcher.abort();
    output
}

fn print_banner(app: &App) {
    let mode = if app.is_yolo() {
        "yolo (no permission prompts)"
    } else {
        "ask before changes"
    };
    println!();
    println!("  taskloom {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Model:        {}", app.agent().config().model);
    println!("  Working dir:  {}", app.working_dir().display());
    println!("  Context:      {}", commands::short_id(app.context_id()));
    println!("  Tools:        {}", app.tools().names().join(", "));
    println!("  Agents:       {}", app.agents().len());
    println!("  Permissions:  {mode}");
    println!();
    println!("  Type /help for commands. Ctrl+C cancels a request; twice while idle quits.");
    println!();
}

/// Handle one line of input. Returns whether the session should end.
async fn handle_line(app: &mut App, line: &str) -> anyhow::Result<CommandOutcome> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(CommandOutcome::Continue);
    }

    let cancel = app.cancel().clone();
    if commands::is_command(line) {
        let mut ui = TerminalQa::new();
        let mut stdout = io::stdout();
        let outcome = interruptible(&cancel, commands::dispatch(app, line, &mut ui, &mut stdout)).await?;
        stdout.flush()?;
        return Ok(outcome);
    }

    let result = interruptible(&cancel, app.run_prompt(line)).await;
    if result.stop_reason == StopReason::AgentError && !result.final_response.is_empty() {
        eprintln!("Error: {}", result.final_response);
    }
    println!("\n{}\n", stop_line(&result));
    Ok(CommandOutcome::Continue)
}

/// Run the session. With `initial` set, that prompt is handled first; with
/// `single_turn` the session ends after one handled line.
pub async fn run(app: &mut App, initial: Option<String>, single_turn: bool) -> anyhow::Result<()> {
    app.agent_mut().set_on_message(Some(echo_callback()));

    if let Some(prompt) = initial {
        let outcome = handle_line(app, &prompt).await?;
        if single_turn || outcome == CommandOutcome::Exit {
            return Ok(());
        }
    }

    print_banner(app);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut exit_armed = false;

    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                if exit_armed {
                    println!();
                    break;
                }
                exit_armed = true;
                println!("\n(Press Ctrl+C again to quit)");
                continue;
            }
        };
        exit_armed = false;

        let Some(line) = line else {
            println!();
            break;
        };
        if handle_line(app, &line).await? == CommandOutcome::Exit || single_turn {
            break;
        }
    }

    app.persist();
    println!("Goodbye.");
    Ok(())
}
