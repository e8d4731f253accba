//! # Taskloom CLI
//!
//! The `taskloom` binary: an interactive REPL around the root agent loop,
//! slash commands for contexts, compaction and planning, and the terminal
//! prompts for tool approval and plan questions.

pub mod app;
pub mod approval;
pub mod commands;
pub mod qa_ui;
pub mod repl;
pub mod terminal;

pub use app::{App, AppOptions, stop_line};
pub use commands::{CommandOutcome, dispatch};
