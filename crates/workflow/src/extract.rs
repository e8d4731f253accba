//! Pull the plan text and the question block out of a planning reply.

use tracing::debug;

use crate::questions::QaSession;

const QUESTIONS_KEY: &str = "{\"questions\"";

/// Find the questions JSON in `output` and parse it.
///
/// A fenced ```` ```json ```` block is preferred; otherwise the first
/// `{"questions"` object is located by brace matching. Anything that
/// does not parse yields an empty session.
pub fn extract_questions(output: &str) -> QaSession {
    let Some(json) = fenced_json(output).or_else(|| braced_questions(output)) else {
        return QaSession::default();
    };
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(value) => QaSession::parse(&value),
        Err(e) => {
            debug!(error = %e, "Planning reply carried unparseable questions");
            QaSession::default()
        }
    }
}

/// The plan text: everything before the questions block, trimmed.
pub fn extract_plan_content(output: &str) -> String {
    let cut = output
        .find("```json")
        .or_else(|| output.find("```JSON"))
        .or_else(|| output.find(QUESTIONS_KEY));
    match cut {
        Some(pos) => output[..pos].trim().to_string(),
        None => output.trim().to_string(),
    }
}

fn fenced_json(output: &str) -> Option<&str> {
    let (start, marker_len) = output
        .find("```json")
        .map(|p| (p, 7))
        .or_else(|| output.find("```JSON").map(|p| (p, 7)))?;
    let body = &output[start + marker_len..];
    let close = body.find("```")?;
    let inner = body[..close].trim();
    (!inner.is_empty()).then_some(inner)
}

/// Brace-match the object starting at `{"questions"`, respecting strings.
fn braced_questions(output: &str) -> Option<&str> {
    let start = output.find(QUESTIONS_KEY)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in output[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&output[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "## Executive Summary\n\nAdd a cache.\n\n\
        ```json\n{\"questions\": [{\"id\": 1, \"text\": \"Where?\", \"options\": [\"memory\", \"disk\"]}]}\n```\n";

    #[test]
    fn fenced_block_is_preferred() {
        let qa = extract_questions(REPLY);
        assert_eq!(qa.len(), 1);
        assert_eq!(qa.questions[0].options, vec!["memory", "disk"]);
        assert_eq!(extract_plan_content(REPLY), "## Executive Summary\n\nAdd a cache.");
    }

    #[test]
    fn uppercase_fence_works() {
        let reply = "plan\n```JSON\n[{\"text\": \"Q?\", \"options\": [\"a\"]}]\n```";
        assert_eq!(extract_questions(reply).len(), 1);
        assert_eq!(extract_plan_content(reply), "plan");
    }

    #[test]
    fn bare_object_found_by_brace_matching() {
        let reply = "The plan.\n{\"questions\": [{\"text\": \"Use {braces} or \\\"quotes\\\"?\", \"options\": [\"}\"]}]} trailing";
        let qa = extract_questions(reply);
        assert_eq!(qa.len(), 1);
        assert_eq!(qa.questions[0].text, "Use {braces} or \"quotes\"?");
        assert_eq!(extract_plan_content(reply), "The plan.");
    }

    #[test]
    fn no_questions_means_empty_session() {
        assert!(extract_questions("just a plan").is_empty());
        assert!(extract_questions("```json\n{broken\n```").is_empty());
        assert!(extract_questions("{\"questions\": [").is_empty());
        assert_eq!(extract_plan_content("  just a plan \n"), "just a plan");
    }
}
