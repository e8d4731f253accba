//! The agent runtime for Taskloom.
//!
//! The loop alternates model completions and tool rounds:
//!
//! 1. **Receive** a user message
//! 2. **Send** the conversation and the allowed tool schemas to the provider
//! 3. **If tool calls**: execute them in order, append results, loop back to step 2
//! 4. **If text only**: the run is complete
//!
//! Subagents are nested loops with their own conversation, started through
//! the [`SubagentOrchestrator`] from the `spawn_agent` tool.

pub mod compaction;
pub mod loop_runner;
pub mod prompt;
pub mod registry;
pub mod subagent;

pub use compaction::{CompactionOutcome, Compactor};
pub use loop_runner::{AgentLoop, MessageCallback};
pub use registry::{AgentDefinition, AgentRegistry, AgentSource, default_search_paths};
pub use subagent::{SubagentOrchestrator, extract_artifacts, extract_modifications, generate_system_prompt};
