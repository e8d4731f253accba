//! # Taskloom Core
//!
//! Domain types, traits, and error definitions for the Taskloom
//! coding-agent orchestrator. This crate has **no framework dependencies**:
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam between subsystems is a trait here (`Provider`, `Tool`,
//! `PermissionPolicy`, `SubagentSpawner`). Implementations live in their
//! respective crates, which keeps the dependency graph pointing inward and
//! lets tests swap in scripted mocks.

pub mod agent;
pub mod cancel;
pub mod error;
pub mod message;
pub mod permission;
pub mod provider;
pub mod subagent;
pub mod tool;
pub mod xml;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, RunResult, SessionStats, StopReason};
pub use cancel::CancelFlag;
pub use error::{Error, Result};
pub use message::{Message, MessageToolCall, Role};
pub use permission::{PermissionDecision, PermissionPolicy};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use subagent::{MAX_SPAWN_DEPTH, SubagentRequest, SubagentResult, SubagentSpawner};
pub use tool::{Tool, ToolContext, ToolRegistry, ToolResult};
