//! Context store for Taskloom.
//!
//! Conversations, compaction archives, plan documents and planning-session
//! records live as plain files under `<data_dir>/contexts/<id>/`, written
//! with write-temp-then-rename semantics.

pub mod state;
pub mod store;

pub use state::{ArchiveRef, CompactEntry, ContextSummary, ConversationState};
pub use store::{ContextStore, PrefixMatch, read_json, write_atomic, write_json_atomic};
