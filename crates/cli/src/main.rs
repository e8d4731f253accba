//! Taskloom: a terminal coding agent with subagents and a planning workflow.
//!
//! Usage:
//! - `taskloom`                     interactive session in the current directory
//! - `taskloom -p "<prompt>"`       answer one prompt and exit
//! - `echo "<prompt>" | taskloom`  same, reading the prompt from stdin

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use taskloom::approval::TerminalApprover;
use taskloom::{App, AppOptions, repl};
use taskloom_config::AppConfig;
use taskloom_core::cancel::CancelFlag;
use taskloom_providers::OpenAiCompatProvider;

#[derive(Parser)]
#[command(
    name = "taskloom",
    about = "Terminal coding agent with subagents and interactive planning",
    version
)]
struct Cli {
    /// Skip every permission prompt
    #[arg(long)]
    yolo: bool,

    /// Tool rounds allowed per request (1-1000)
    #[arg(short = 'm', long)]
    max_iterations: Option<u32>,

    /// Where contexts and custom agents are stored
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory the agent works in
    #[arg(short = 'C', long)]
    working_dir: Option<PathBuf>,

    /// Run this prompt first
    #[arg(short, long)]
    prompt: Option<String>,

    /// Exit after the first prompt
    #[arg(long)]
    single_turn: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file to use instead of ~/.taskloom/config.toml
    #[arg(long, env = "TASKLOOM_CONFIG")]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// A prompt piped on stdin, if stdin is not a terminal.
fn piped_prompt() -> anyhow::Result<Option<String>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut text = String::new();
    stdin.lock().read_to_string(&mut text).context("failed to read stdin")?;
    let text = text.trim().to_string();
    Ok((!text.is_empty()).then_some(text))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref()).context("failed to load config")?;
    let provider = OpenAiCompatProvider::from_config(&config).context("failed to set up the provider")?;

    let working_dir = match cli.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };

    let mut prompt = cli.prompt;
    if prompt.is_none() {
        prompt = piped_prompt()?;
    }
    let single_turn = cli.single_turn || prompt.is_some();

    let cancel = CancelFlag::new();
    let options = AppOptions {
        working_dir,
        data_dir: cli.data_dir,
        max_iterations: cli.max_iterations,
        yolo: cli.yolo,
        cancel: cancel.clone(),
    };
    let mut app = App::new(
        config,
        options,
        Arc::new(provider),
        Some(Arc::new(TerminalApprover::new(cancel))),
    )?;

    repl::run(&mut app, prompt, single_turn).await
}
