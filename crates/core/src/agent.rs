//! Agent configuration, stop reasons and session statistics.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::provider::{Timings, Usage};

pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
pub const MIN_MAX_ITERATIONS: u32 = 1;
pub const MAX_MAX_ITERATIONS: u32 = 1000;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Configuration for a single agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier forwarded to the provider
    pub model: String,

    pub temperature: f32,

    pub max_tokens: Option<u32>,

    /// Maximum tool execution rounds per `run()`
    pub max_iterations: u32,

    /// Per tool call timeout
    pub tool_timeout: Duration,

    /// Directory tools resolve relative paths against
    pub working_dir: PathBuf,

    /// Root of the context store, handed to tools such as `read_plan`
    pub context_base_path: PathBuf,

    /// Active conversation context, if any
    pub context_id: Option<String>,

    /// `None` allows every registered tool; `Some(list)` allows only those
    /// names, so an empty list allows none.
    pub allowed_tools: Option<Vec<String>>,

    /// Replaces the default system prompt
    pub custom_system_prompt: Option<String>,

    /// Leave the markdown tool table out of the system prompt
    pub skip_tool_table: bool,

    /// Extra section appended to the system prompt (e.g. available agents)
    pub prompt_appendix: Option<String>,

    /// Nesting level of this loop; the root conversation is 0
    pub spawn_depth: u32,
}

impl AgentConfig {
    pub fn new(model: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            context_base_path: working_dir.join(".taskloom"),
            working_dir,
            context_id: None,
            allowed_tools: None,
            custom_system_prompt: None,
            skip_tool_table: false,
            prompt_appendix: None,
            spawn_depth: 0,
        }
    }

    /// Whether `tool_name` passes this loop's allow-list.
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        match &self.allowed_tools {
            None => true,
            Some(list) => list.iter().any(|t| t == tool_name),
        }
    }
}

/// Clamp a requested iteration cap into the supported range.
pub fn clamp_max_iterations(requested: u32) -> u32 {
    requested.clamp(MIN_MAX_ITERATIONS, MAX_MAX_ITERATIONS)
}

/// Why a `run()` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxIterations,
    UserCancelled,
    AgentError,
}

/// Outcome of one `run()` call.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub stop_reason: StopReason,
    pub final_response: String,
    pub iterations: u32,
}

/// Token and timing counters accumulated across runs until `clear()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_input: u64,
    pub total_output: u64,
    pub total_cached: u64,
    pub total_prompt_ms: f64,
    pub total_predicted_ms: f64,
    /// Prompt size of the most recent request
    pub current_context_tokens: u64,
}

impl SessionStats {
    pub fn accumulate(&mut self, usage: Option<&Usage>, timings: Option<&Timings>) {
        if let Some(u) = usage {
            self.total_input += u64::from(u.prompt_tokens);
            self.total_output += u64::from(u.completion_tokens);
            self.total_cached += u64::from(u.cached_tokens);
            self.current_context_tokens = u64::from(u.prompt_tokens) + u64::from(u.completion_tokens);
        }
        if let Some(t) = timings {
            self.total_prompt_ms += t.prompt_ms;
            self.total_predicted_ms += t.predicted_ms;
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input + self.total_output
    }

    /// Generation throughput, when timings are known.
    pub fn tokens_per_second(&self) -> Option<f64> {
        if self.total_predicted_ms > 0.0 {
            Some(self.total_output as f64 * 1000.0 / self.total_predicted_ms)
        } else {
            None
        }
    }
}
