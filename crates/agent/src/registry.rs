//! Named agent templates.
//!
//! An agent is a markdown file (`<dir>/<name>/AGENT.md`) whose frontmatter
//! names it and restricts its tools, and whose body holds its instructions.
//! Two agents ship inside the binary; they cannot be shadowed from disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use taskloom_core::error::AgentError;
use taskloom_core::xml::escape_xml;
use tracing::{debug, warn};

pub const AGENT_FILE_NAME: &str = "AGENT.md";
pub const DEFAULT_AGENT_MAX_ITERATIONS: u32 = 20;
pub const MAX_AGENT_MAX_ITERATIONS: u32 = 100;
const MAX_NAME_LEN: usize = 64;

const EMBEDDED_AGENTS: &[(&str, &str)] = &[
    ("planning-agent", include_str!("../agents/planning-agent.md")),
    ("explorer-agent", include_str!("../agents/explorer-agent.md")),
];

/// Where a definition came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSource {
    Embedded,
    File(PathBuf),
}

/// A parsed agent template.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    /// Empty means the agent runs without tools
    pub allowed_tools: Vec<String>,
    pub max_iterations: u32,
    /// Markdown body of the file
    pub instructions: String,
    /// Frontmatter keys this crate does not interpret
    pub metadata: BTreeMap<String, String>,
    pub source: AgentSource,
}

impl AgentDefinition {
    /// Parse an `AGENT.md` document.
    pub fn parse(content: &str, source: AgentSource) -> Result<Self, AgentError> {
        let invalid = |reason: &str| AgentError::InvalidDefinition {
            path: match &source {
                AgentSource::Embedded => "<embedded>".into(),
                AgentSource::File(p) => p.display().to_string(),
            },
            reason: reason.to_string(),
        };

        let (fields, body) = parse_frontmatter(content).ok_or_else(|| invalid("missing frontmatter"))?;

        let mut name = None;
        let mut description = None;
        let mut allowed_tools = Vec::new();
        let mut max_iterations = DEFAULT_AGENT_MAX_ITERATIONS;
        let mut metadata = BTreeMap::new();

        for (key, value) in fields {
            match key.as_str() {
                "name" => name = Some(value),
                "description" => description = Some(value),
                "allowed-tools" => {
                    allowed_tools = value.split_whitespace().map(str::to_string).collect();
                }
                "max-iterations" => {
                    max_iterations = value
                        .parse::<u32>()
                        .map(|n| n.clamp(1, MAX_AGENT_MAX_ITERATIONS))
                        .unwrap_or(DEFAULT_AGENT_MAX_ITERATIONS);
                }
                _ => {
                    metadata.insert(key, value);
                }
            }
        }

        let name = name.filter(|n| !n.is_empty()).ok_or_else(|| invalid("missing name"))?;
        if !validate_name(&name) {
            return Err(invalid(&format!("invalid name '{name}'")));
        }
        let description = description
            .filter(|d| !d.is_empty())
            .ok_or_else(|| invalid("missing description"))?;

        Ok(Self {
            name,
            description,
            allowed_tools,
            max_iterations,
            instructions: body.to_string(),
            metadata,
            source,
        })
    }

    pub fn is_embedded(&self) -> bool {
        self.source == AgentSource::Embedded
    }
}

/// Split `---` delimited frontmatter from the body.
///
/// Returns `key: value` pairs in file order; blank lines and `#` comments
/// are skipped, and values may be wrapped in quotes.
pub fn parse_frontmatter(content: &str) -> Option<(Vec<(String, String)>, &str)> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let header = &rest[..end];
    let after = &rest[end + 4..];
    // skip the remainder of the closing fence line
    let body = match after.find('\n') {
        Some(pos) => &after[pos + 1..],
        None => "",
    };
    let body = body.trim_start_matches(['\n', '\r']);

    let fields = header
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect();

    Some((fields, body))
}

/// Agent names: 1 to 64 chars of `[a-z0-9-]`, no leading, trailing or doubled hyphen.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Directories searched for `AGENT.md` files, highest priority first.
pub fn default_search_paths(data_dir: &Path, working_dir: &Path) -> Vec<PathBuf> {
    let mut paths = vec![data_dir.join("agents")];
    let project = working_dir.join(".taskloom").join("agents");
    if !paths.contains(&project) {
        paths.push(project);
    }
    let user = taskloom_config::AppConfig::config_dir().join("agents");
    if !paths.contains(&user) {
        paths.push(user);
    }
    paths
}

/// Catalog of agent definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the agents compiled into the binary.
    pub fn with_embedded() -> Self {
        let mut registry = Self::new();
        registry.add_embedded();
        registry
    }

    /// Discover agents on disk plus the embedded ones.
    ///
    /// Among disk entries an earlier search path wins; a disk agent that
    /// reuses an embedded name is skipped.
    pub fn discover(search_paths: &[PathBuf]) -> Self {
        let mut registry = Self::new();

        for dir in search_paths.iter().rev() {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut candidates: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path().join(AGENT_FILE_NAME))
                .filter(|p| p.is_file())
                .collect();
            candidates.sort();

            for path in candidates {
                let content = match std::fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read agent file");
                        continue;
                    }
                };
                match AgentDefinition::parse(&content, AgentSource::File(path.clone())) {
                    Ok(def) if is_embedded_name(&def.name) => {
                        debug!(agent = %def.name, path = %path.display(), "Skipping agent that shadows a built-in");
                    }
                    Ok(def) => {
                        debug!(agent = %def.name, path = %path.display(), "Discovered agent");
                        registry.agents.insert(def.name.clone(), def);
                    }
                    Err(e) => warn!(error = %e, "Skipping invalid agent"),
                }
            }
        }

        registry.add_embedded();
        registry
    }

    fn add_embedded(&mut self) {
        for (name, content) in EMBEDDED_AGENTS {
            match AgentDefinition::parse(content, AgentSource::Embedded) {
                Ok(def) => {
                    self.agents.insert(def.name.clone(), def);
                }
                Err(e) => warn!(agent = %name, error = %e, "Built-in agent failed to parse"),
            }
        }
    }

    /// Add or replace a definition.
    pub fn insert(&mut self, definition: AgentDefinition) {
        self.agents.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name)
    }

    /// Definitions sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// The `<available_agents>` block appended to the root system prompt.
    pub fn generate_prompt_section(&self) -> String {
        if self.agents.is_empty() {
            return String::new();
        }
        let mut out = String::from("<available_agents>\n");
        for agent in self.agents.values() {
            out.push_str("<agent>\n");
            out.push_str(&format!("  <name>{}</name>\n", escape_xml(&agent.name)));
            out.push_str(&format!(
                "  <description>{}</description>\n",
                escape_xml(&agent.description)
            ));
            if !agent.allowed_tools.is_empty() {
                out.push_str(&format!(
                    "  <tools>{}</tools>\n",
                    escape_xml(&agent.allowed_tools.join(" "))
                ));
            }
            out.push_str("</agent>\n");
        }
        out.push_str("</available_agents>\n");
        out
    }
}

fn is_embedded_name(name: &str) -> bool {
    EMBEDDED_AGENTS.iter().any(|(n, _)| *n == name)
}
