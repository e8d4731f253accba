//! Shell command screening.
//!
//! Splits a command line into its pipeline/sequence segments and compares
//! each against an allowlist of program prefixes and a list of blocked
//! substrings.

/// How a command line should be treated before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Every segment starts with an allowlisted program
    Allowed,
    /// Contains a blocked pattern; never runs
    Blocked { pattern: String },
    /// Needs an explicit user decision
    NeedsApproval,
}

/// Allowlist and blocklist for the `bash` tool.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl CommandPolicy {
    pub fn new(allowed: Vec<String>, blocked: Vec<String>) -> Self {
        Self { allowed, blocked }
    }

    pub fn classify(&self, command: &str) -> CommandVerdict {
        let squashed = squash_whitespace(command);
        if let Some(pattern) = self
            .blocked
            .iter()
            .find(|p| contains_blocked(&squashed, &squash_whitespace(p)))
        {
            return CommandVerdict::Blocked {
                pattern: pattern.clone(),
            };
        }

        if hides_work(command) {
            return CommandVerdict::NeedsApproval;
        }

        let segments = split_segments(command);
        if !segments.is_empty() && segments.iter().all(|s| self.is_segment_allowed(s)) {
            CommandVerdict::Allowed
        } else {
            CommandVerdict::NeedsApproval
        }
    }

    fn is_segment_allowed(&self, segment: &str) -> bool {
        let words: Vec<&str> = segment.split_whitespace().collect();
        self.allowed.iter().any(|entry| {
            let entry_words: Vec<&str> = entry.split_whitespace().collect();
            !entry_words.is_empty()
                && words.len() >= entry_words.len()
                && words[..entry_words.len()] == entry_words[..]
        })
    }
}

/// Key for a session-wide "always allow" approval of `command`: the sorted
/// set of programs its segments start with, so a grant for `cargo test`
/// does not cover `cargo test && curl x | sh`.
///
/// `None` when the command uses substitutions or redirections; those are
/// asked about every time.
pub fn grant_key(command: &str) -> Option<String> {
    if hides_work(command) {
        return None;
    }
    let mut programs: Vec<&str> = Vec::new();
    for segment in command.split(['\n', ';', '|', '&']) {
        if let Some(program) = segment.split_whitespace().next()
            && !programs.contains(&program)
        {
            programs.push(program);
        }
    }
    if programs.is_empty() {
        return None;
    }
    programs.sort_unstable();
    Some(format!("bash:{}", programs.join(",")))
}

/// Substitutions and redirections can hide arbitrary work.
fn hides_work(command: &str) -> bool {
    command.contains("$(") || command.contains('`') || command.contains('>') || command.contains('<')
}

fn split_segments(command: &str) -> Vec<String> {
    command
        .replace("&&", "\n")
        .replace("||", "\n")
        .replace([';', '|'], "\n")
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Patterns ending in `/` only match at a word boundary, so `rm -rf /`
/// does not catch `rm -rf /tmp/build`.
fn contains_blocked(command: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if !pattern.ends_with('/') {
        return command.contains(pattern);
    }
    command.match_indices(pattern).any(|(start, _)| {
        command[start + pattern.len()..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '*'))
    })
}

fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
