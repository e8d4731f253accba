//! Design questions asked during planning, and the user's answers.

use serde::{Deserialize, Serialize};

/// One multiple-choice question from the planning agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanQuestion {
    pub id: u32,
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// The chosen option text or the user's own answer; empty until answered
    #[serde(default)]
    pub selected_answer: String,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(
        default,
        rename = "selected_option_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub selected_option: Option<usize>,
}

impl PlanQuestion {
    pub fn is_answered(&self) -> bool {
        !self.selected_answer.trim().is_empty()
    }

    /// Pick one of the predefined options. Out-of-range indexes are ignored.
    pub fn select_option(&mut self, index: usize) {
        if let Some(option) = self.options.get(index) {
            self.selected_answer = option.clone();
            self.selected_option = Some(index);
            self.is_custom = false;
        }
    }

    /// Record a free-text answer.
    pub fn set_custom_answer(&mut self, text: impl Into<String>) {
        self.selected_answer = text.into();
        self.selected_option = None;
        self.is_custom = true;
    }
}

/// The questions of one planning round, in the order they were asked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaSession {
    #[serde(default)]
    pub questions: Vec<PlanQuestion>,
    /// Tab the UI was on, so an interrupted session reopens where it stopped
    #[serde(default, rename = "current_question_index")]
    pub current_question: usize,
}

/// How an interactive Q&A session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaOutcome {
    /// Every question has an answer
    Completed,
    /// The user confirmed they want to stop planning
    Aborted,
    /// The cancellation flag was raised mid-session
    Interrupted,
}

impl QaSession {
    /// Build a session from model output.
    ///
    /// Accepts `{"questions": [...]}` or a bare array. Each entry may use
    /// `text` or `question`, and `options` or `answers`; a missing `id`
    /// defaults to the 1-based position. Entries without text or options
    /// are dropped.
    pub fn parse(value: &serde_json::Value) -> Self {
        let entries = match value.get("questions").and_then(|q| q.as_array()) {
            Some(list) => list,
            None => match value.as_array() {
                Some(list) => list,
                None => return Self::default(),
            },
        };

        let questions = entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let id = entry
                    .get("id")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(i as u32 + 1);
                let text = entry
                    .get("text")
                    .or_else(|| entry.get("question"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                let options: Vec<String> = entry
                    .get("options")
                    .filter(|v| v.is_array())
                    .or_else(|| entry.get("answers"))
                    .and_then(|v| v.as_array())
                    .map(|opts| {
                        opts.iter()
                            .filter_map(|o| o.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();

                (!text.is_empty() && !options.is_empty()).then(|| PlanQuestion {
                    id,
                    text,
                    options,
                    ..Default::default()
                })
            })
            .collect();

        Self {
            questions,
            current_question: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// True once there is at least one question and all are answered.
    pub fn is_complete(&self) -> bool {
        !self.questions.is_empty() && self.questions.iter().all(PlanQuestion::is_answered)
    }

    pub fn answered_count(&self) -> usize {
        self.questions.iter().filter(|q| q.is_answered()).count()
    }

    /// The answers as a continuation turn for the planning agent.
    pub fn format_answers(&self) -> String {
        let mut out = String::from("User's design decisions:\n\n");
        for question in &self.questions {
            out.push_str(&format!("Q{}: {}\n", question.id, question.text));
            out.push_str(&format!("Answer: {}", question.selected_answer));
            if question.is_custom {
                out.push_str(" (custom response)");
            }
            out.push_str("\n\n");
        }
        out
    }
}
