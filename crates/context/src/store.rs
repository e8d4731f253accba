//! File-backed context store.
//!
//! Layout under the base directory:
//!
//! ```text
//! contexts/<id>/conversation.json          live conversation
//! contexts/<id>/conversation_<ts>.json     compaction archive (immutable)
//! contexts/<id>/compact_<ts>.json          compaction entry
//! contexts/<id>/plan.md                    approved or in-progress plan
//! contexts/<id>/plan_state.json            planning session
//! ```
//!
//! Every write goes to a temporary sibling first and is renamed into place,
//! so a crash never leaves a half-written record behind.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use taskloom_core::error::StoreError;
use taskloom_core::message::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{ArchiveRef, CompactEntry, ContextSummary, ConversationState};

const CONVERSATION_FILE: &str = "conversation.json";
const PLAN_FILE: &str = "plan.md";

/// Outcome of resolving a user-typed id prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixMatch {
    None,
    One(String),
    Many,
}

/// Conversation contexts rooted at a data directory.
#[derive(Debug, Clone)]
pub struct ContextStore {
    base: PathBuf,
}

impl ContextStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn contexts_dir(&self) -> PathBuf {
        self.base.join("contexts")
    }

    pub fn context_dir(&self, id: &str) -> PathBuf {
        self.contexts_dir().join(id)
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.context_dir(id).join(CONVERSATION_FILE)
    }

    pub fn plan_path(&self, id: &str) -> PathBuf {
        self.context_dir(id).join(PLAN_FILE)
    }

    /// Allocate a new context and persist its empty conversation.
    pub fn create(&self) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let state = ConversationState::new(id.clone());
        write_json_atomic(&self.conversation_path(&id), &state)?;
        info!(context_id = %id, "Created context");
        Ok(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.conversation_path(id).is_file()
    }

    /// Load a conversation; `Ok(None)` when the context does not exist.
    pub fn load(&self, id: &str) -> Result<Option<ConversationState>, StoreError> {
        let path = self.conversation_path(id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Persist a conversation, bumping its `updated_at`.
    pub fn save(&self, state: &mut ConversationState) -> Result<(), StoreError> {
        state.updated_at = Utc::now();
        write_json_atomic(&self.conversation_path(&state.id), state)
    }

    fn load_or_new(&self, id: &str) -> Result<ConversationState, StoreError> {
        Ok(self
            .load(id)?
            .unwrap_or_else(|| ConversationState::new(id)))
    }

    pub fn append_message(&self, id: &str, message: &Message) -> Result<(), StoreError> {
        let mut state = self.load_or_new(id)?;
        state.messages.push(message.clone());
        self.save(&mut state)
    }

    /// Replace the stored messages wholesale.
    pub fn save_messages(&self, id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let mut state = self.load_or_new(id)?;
        state.messages = messages.to_vec();
        self.save(&mut state)
    }

    /// All contexts, most recently updated first. Unreadable records are skipped.
    pub fn list(&self) -> Vec<ContextSummary> {
        let Ok(entries) = std::fs::read_dir(self.contexts_dir()) else {
            return Vec::new();
        };

        let mut summaries: Vec<ContextSummary> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let path = e.path().join(CONVERSATION_FILE);
                match read_json::<ConversationState>(&path) {
                    Ok(state) => Some(ContextSummary {
                        preview: state.preview(),
                        message_count: state.messages.len(),
                        id: state.id,
                        created_at: state.created_at,
                        updated_at: state.updated_at,
                    }),
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable context");
                        None
                    }
                }
            })
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Resolve a (possibly abbreviated) context id.
    pub fn resolve_prefix(&self, prefix: &str) -> PrefixMatch {
        let matches: Vec<String> = self
            .list()
            .into_iter()
            .map(|s| s.id)
            .filter(|id| id.starts_with(prefix))
            .collect();
        match matches.len() {
            0 => PrefixMatch::None,
            1 => PrefixMatch::One(matches.into_iter().next().unwrap_or_default()),
            _ => PrefixMatch::Many,
        }
    }

    /// Remove a context and everything in it. `Ok(false)` if it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let dir = self.context_dir(id);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        info!(context_id = %id, "Deleted context");
        Ok(true)
    }

    /// Archive the live conversation, then replace it with one summary message.
    ///
    /// The archive is written before the conversation is touched; if that
    /// write fails, the conversation is left as it was.
    pub fn compact(&self, id: &str, entry: &CompactEntry) -> Result<ArchiveRef, StoreError> {
        let mut state = self
            .load(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let dir = self.context_dir(id);

        let timestamp = self.unique_timestamp(&dir);
        let archive = format!("conversation_{timestamp}.json");
        let compact_ref = format!("compact_{timestamp}.json");

        write_json_atomic(&dir.join(&archive), &state.messages)?;

        let mut stamped = entry.clone();
        stamped.timestamp = timestamp.clone();
        write_json_atomic(&dir.join(&compact_ref), &stamped)?;

        let archive_ref = ArchiveRef {
            timestamp,
            archive,
            compact_ref,
            message_count: state.messages.len(),
        };

        let archives = state
            .metadata
            .entry("archives")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(list) = archives {
            list.push(serde_json::json!({
                "timestamp": archive_ref.timestamp,
                "message_count": archive_ref.message_count,
                "compact_ref": archive_ref.compact_ref,
            }));
        }
        if let Some(plan_ref) = &entry.plan_ref {
            state
                .metadata
                .insert("plan_ref".into(), serde_json::Value::String(plan_ref.clone()));
        }

        state.messages = vec![Message::system(entry.to_summary_message())];
        self.save(&mut state)?;

        info!(
            context_id = %id,
            archived = archive_ref.message_count,
            archive = %archive_ref.archive,
            "Compacted context"
        );
        Ok(archive_ref)
    }

    /// Seconds-resolution stamps can collide; suffix until the name is free.
    fn unique_timestamp(&self, dir: &Path) -> String {
        let base = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut candidate = base.clone();
        let mut n = 1;
        while dir.join(format!("conversation_{candidate}.json")).exists() {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        candidate
    }

    /// Compaction archives of a context, oldest first.
    pub fn archives(&self, id: &str) -> Result<Vec<ArchiveRef>, StoreError> {
        let dir = self.context_dir(id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut refs: Vec<ArchiveRef> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let timestamp = name
                    .strip_prefix("conversation_")?
                    .strip_suffix(".json")?
                    .to_string();
                let message_count = read_json::<Vec<serde_json::Value>>(&e.path())
                    .map(|m| m.len())
                    .unwrap_or(0);
                Some(ArchiveRef {
                    compact_ref: format!("compact_{timestamp}.json"),
                    archive: name,
                    timestamp,
                    message_count,
                })
            })
            .collect();
        refs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(refs)
    }

    /// Read back an archived message array.
    pub fn load_archive(&self, id: &str, archive: &ArchiveRef) -> Result<Vec<Message>, StoreError> {
        read_json(&self.context_dir(id).join(&archive.archive))
    }

    pub fn load_compact_entry(&self, id: &str, archive: &ArchiveRef) -> Result<CompactEntry, StoreError> {
        read_json(&self.context_dir(id).join(&archive.compact_ref))
    }

    /// Write `plan.md` and record it in the conversation metadata.
    pub fn save_plan(&self, id: &str, content: &str) -> Result<PathBuf, StoreError> {
        let path = self.plan_path(id);
        write_atomic(&path, content.as_bytes())?;

        if let Some(mut state) = self.load(id)? {
            state
                .metadata
                .insert("plan_ref".into(), serde_json::Value::String(PLAN_FILE.into()));
            self.save(&mut state)?;
        }
        debug!(context_id = %id, path = %path.display(), "Saved plan");
        Ok(path)
    }

    /// Plan text, or an empty string when there is none.
    pub fn load_plan(&self, id: &str) -> Result<String, StoreError> {
        let path = self.plan_path(id);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    pub fn has_plan(&self, id: &str) -> bool {
        self.plan_path(id).is_file()
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Write bytes to `path` through a temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        io_error(path, e)
    })
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupted {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    write_atomic(path, json.as_bytes())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
