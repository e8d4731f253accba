//! Configuration loading, validation, and management for Taskloom.
//!
//! Loads configuration from `~/.taskloom/config.toml` with environment
//! variable overrides. Validates all settings at startup; command-line
//! flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use taskloom_core::agent::{DEFAULT_MAX_ITERATIONS, clamp_max_iterations};

/// Name of the per-user and per-project data directory.
pub const DATA_DIR_NAME: &str = ".taskloom";

/// The root configuration structure.
///
/// Maps directly to `~/.taskloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the inference server (optional for local servers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible server
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// llama.cpp server slot to pin requests to; enables slot clearing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<u32>,

    /// HTTP timeout for one completion request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Tool permission settings
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

fn default_api_url() -> String {
    "http://localhost:8080/v1".into()
}
fn default_model() -> String {
    "default".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout_secs() -> u64 {
    600
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("slot_id", &self.slot_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("agent", &self.agent)
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Tool execution rounds per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Per tool call timeout in milliseconds
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Skip every permission prompt
    #[serde(default)]
    pub yolo: bool,

    /// Where contexts and agents live; defaults to `<working_dir>/.taskloom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
fn default_tool_timeout_ms() -> u64 {
    120_000
}

impl AgentSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_ms: default_tool_timeout_ms(),
            yolo: false,
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Programs `bash` may run without asking
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Command substrings that are always refused
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,

    /// Paths no tool may touch (`~` expands to the home directory)
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "wc", "grep", "rg", "find", "pwd", "echo", "which", "tree",
        "git status", "git diff", "git log", "git show", "git branch",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_blocked_patterns() -> Vec<String> {
    [
        "rm -rf /",
        "rm -rf ~",
        "rm -rf *",
        ":(){ :|:& };:",
        "mkfs",
        "dd if=",
        "> /dev/sd",
        "chmod -R 777 /",
        "shutdown",
        "reboot",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_forbidden_paths() -> Vec<String> {
    ["~/.ssh", "~/.gnupg", "~/.aws", "/etc/shadow", "/etc/sudoers", "/proc", "/sys"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            blocked_patterns: default_blocked_patterns(),
            forbidden_paths: default_forbidden_paths(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskloom/config.toml).
    ///
    /// Environment overrides:
    /// - `TASKLOOM_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `TASKLOOM_API_URL`
    /// - `TASKLOOM_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TASKLOOM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("TASKLOOM_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = lookup("TASKLOOM_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        home_dir().join(DATA_DIR_NAME)
    }

    /// Directory holding contexts and custom agents for `working_dir`.
    pub fn data_dir_for(&self, working_dir: &Path) -> PathBuf {
        self.agent
            .data_dir
            .clone()
            .unwrap_or_else(|| working_dir.join(DATA_DIR_NAME))
    }

    /// Validate the configuration, clamping values that have a safe range.
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        if self.agent.tool_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_timeout_ms must be > 0".into(),
            ));
        }

        let clamped = clamp_max_iterations(self.agent.max_iterations);
        if clamped != self.agent.max_iterations {
            tracing::warn!(
                requested = self.agent.max_iterations,
                clamped,
                "agent.max_iterations out of range"
            );
            self.agent.max_iterations = clamped;
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            slot_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            agent: AgentSettings::default(),
            permissions: PermissionsConfig::default(),
        }
    }
}

/// Get the user's home directory.
pub fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 50);
        assert_eq!(config.agent.tool_timeout(), Duration::from_secs(120));
        assert!(!config.agent.yolo);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.api_url, config.api_url);
        assert_eq!(parsed.agent.max_iterations, config.agent.max_iterations);
        assert_eq!(parsed.permissions.blocked_patterns, config.permissions.blocked_patterns);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_iterations_are_clamped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nmax_iterations = 5000").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agent.max_iterations, 1000);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.api_url, "http://localhost:8080/v1");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_take_priority() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("TASKLOOM_API_KEY", "sk-taskloom"),
            ("TASKLOOM_MODEL", "qwen"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-taskloom"));
        assert_eq!(config.default_model, "qwen");
        assert_eq!(config.api_url, "http://localhost:8080/v1");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn data_dir_defaults_to_project_local() {
        let config = AppConfig::default();
        assert_eq!(
            config.data_dir_for(Path::new("/work")),
            PathBuf::from("/work/.taskloom")
        );
    }
}
