//! Markdown layout of `plan.md` and in-place edits of its sections.

use regex::Regex;
use std::sync::LazyLock;

use crate::questions::QaSession;

static STATUS_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"- Status: \w+").ok());
static VERSION_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"- Version: \d+").ok());

const DECISIONS_HEADER: &str = "## Design Decisions";
const METADATA_HEADER: &str = "## Metadata";

/// Inputs for rendering a complete plan document.
#[derive(Debug, Clone, Default)]
pub struct PlanData {
    pub task_summary: String,
    pub created_at: String,
    pub version: u32,
    pub status: String,
    pub executive_summary: String,
    /// (question, answer) pairs in the order they were decided
    pub design_decisions: Vec<(String, String)>,
    pub plan_body: String,
}

/// Title and metadata block.
pub fn generate_header(task_summary: &str, created_at: &str, version: u32, status: &str) -> String {
    format!(
        "# Implementation Plan: {task_summary}\n\n{METADATA_HEADER}\n- Created: {created_at}\n- Version: {version}\n- Status: {status}\n\n"
    )
}

/// Render the whole document. Empty sections are left out.
pub fn generate(data: &PlanData) -> String {
    let mut out = generate_header(
        &data.task_summary,
        &data.created_at,
        data.version,
        &data.status,
    );

    if !data.executive_summary.is_empty() {
        out.push_str("## Executive Summary\n\n");
        out.push_str(&data.executive_summary);
        out.push_str("\n\n");
    }

    if !data.design_decisions.is_empty() {
        out.push_str(DECISIONS_HEADER);
        out.push_str("\n\nBased on the following user preferences:\n\n");
        for (question, answer) in &data.design_decisions {
            out.push_str(&format!("- **{question}**: {answer}\n"));
        }
        out.push('\n');
    }

    out.push_str(&data.plan_body);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn decisions_section(qa: &QaSession) -> String {
    let mut out = format!("{DECISIONS_HEADER}\n\nBased on the following user preferences:\n\n");
    for question in qa.questions.iter().filter(|q| q.is_answered()) {
        out.push_str(&format!("- **{}**: {}", question.text, question.selected_answer));
        if question.is_custom {
            out.push_str(" *(custom)*");
        }
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Rewrite the design decisions section from the answered questions.
///
/// An existing section is replaced. Otherwise the section goes in front
/// of the first heading after the metadata block, or at the end.
pub fn update_design_decisions(markdown: &str, qa: &QaSession) -> String {
    let section = decisions_section(qa);

    if let Some((start, end)) = section_bounds(markdown, DECISIONS_HEADER) {
        let mut out = String::with_capacity(markdown.len() + section.len());
        out.push_str(&markdown[..start]);
        out.push_str(&section);
        out.push_str(&markdown[end..]);
        return out;
    }

    if let Some(meta) = markdown.find(METADATA_HEADER) {
        let after_meta = meta + METADATA_HEADER.len();
        if let Some(rel) = markdown[after_meta..].find("\n## ") {
            let insert_at = after_meta + rel + 1;
            let mut out = String::with_capacity(markdown.len() + section.len());
            out.push_str(&markdown[..insert_at]);
            out.push_str(&section);
            out.push_str(&markdown[insert_at..]);
            return out;
        }
    }

    let mut out = markdown.to_string();
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push_str(if out.ends_with('\n') { "\n" } else { "\n\n" });
    }
    out.push_str(&section);
    out
}

/// Replace the first `- Status: <word>` line.
pub fn update_status(markdown: &str, status: &str) -> String {
    replace_first(STATUS_LINE.as_ref(), markdown, &format!("- Status: {status}"))
}

/// Replace the first `- Version: <n>` line.
pub fn update_version(markdown: &str, version: u32) -> String {
    replace_first(VERSION_LINE.as_ref(), markdown, &format!("- Version: {version}"))
}

fn replace_first(pattern: Option<&Regex>, markdown: &str, line: &str) -> String {
    match pattern {
        Some(re) => re.replace(markdown, regex::NoExpand(line)).into_owned(),
        None => markdown.to_string(),
    }
}

/// Byte range of a section: from its header to the start of the next
/// `## ` heading, or to the end of the document.
fn section_bounds(markdown: &str, header: &str) -> Option<(usize, usize)> {
    let start = markdown.find(header)?;
    let body = start + header.len();
    let end = markdown[body..]
        .find("\n## ")
        .map_or(markdown.len(), |rel| body + rel + 1);
    Some((start, end))
}

/// Text of a section, without its header line.
pub fn extract_section(markdown: &str, header: &str) -> Option<String> {
    let start = markdown.find(header)?;
    let after_header = start + header.len();
    let content_start = markdown[after_header..]
        .find('\n')
        .map_or(markdown.len(), |rel| after_header + rel + 1);
    let end = markdown[content_start..]
        .find("\n## ")
        .map_or(markdown.len(), |rel| content_start + rel);
    Some(markdown[content_start..end].to_string())
}

/// Swap a whole section (header included) for `replacement`.
/// Returns the input unchanged when the header is absent.
pub fn replace_section(markdown: &str, header: &str, replacement: &str) -> String {
    match section_bounds(markdown, header) {
        Some((start, end)) => {
            let mut out = String::with_capacity(markdown.len() + replacement.len());
            out.push_str(&markdown[..start]);
            out.push_str(replacement);
            out.push_str(&markdown[end..]);
            out
        }
        None => markdown.to_string(),
    }
}
