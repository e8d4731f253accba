//! Security module for Taskloom: tool permissions, command screening, and
//! path validation.
//!
//! Provides:
//! - **Permission manager**: the [`PermissionPolicy`](taskloom_core::PermissionPolicy)
//!   consulted before each tool call, with session-wide approvals
//! - **Command screening**: allowlisted programs and blocked patterns for `bash`
//! - **Path validation**: working-directory resolution and forbidden paths

pub mod commands;
pub mod path;
pub mod permission;

pub use commands::{CommandPolicy, CommandVerdict};
pub use path::{PathValidationError, is_within, resolve_path, validate_path};
pub use permission::{ApprovalAnswer, ApprovalPrompter, ApprovalRequest, PermissionManager};
