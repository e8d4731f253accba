//! Terminal front end of the planning workflow.
//!
//! [`QaForm`] is the key-driven state of the question form and does no I/O,
//! so it can be tested with synthetic key events. [`TerminalQa`] paints it
//! in raw mode and implements [`PlanInteraction`] for the REPL.

use std::io::{self, Write};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use taskloom_core::cancel::CancelFlag;
use taskloom_workflow::{PlanInteraction, PlanningSession, QaOutcome, QaSession};
use tracing::warn;

use crate::terminal::{self, Choice, TerminalGuard};

/// Lines of the plan shown before asking for approval.
const PLAN_PREVIEW_LINES: usize = 50;

const CUSTOM_ROW_LABEL: &str = "Type your own answer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    Choosing,
    Typing(String),
    ConfirmAbort,
}

/// What a key press did to the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormEvent {
    Pending,
    Submit,
    Abort,
    Interrupt,
}

/// One question per tab; each tab lists its options plus a free-text row.
pub struct QaForm<'a> {
    qa: &'a mut QaSession,
    cursor: usize,
    mode: FormMode,
    notice: Option<String>,
}

impl<'a> QaForm<'a> {
    pub fn new(qa: &'a mut QaSession) -> Self {
        if qa.current_question >= qa.questions.len() {
            qa.current_question = 0;
        }
        let mut form = Self {
            qa,
            cursor: 0,
            mode: FormMode::Choosing,
            notice: None,
        };
        form.cursor = form.initial_cursor();
        form
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> usize {
        self.qa.current_question
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    fn rows(&self) -> usize {
        self.qa
            .questions
            .get(self.qa.current_question)
            .map_or(1, |q| q.options.len() + 1)
    }

    fn initial_cursor(&self) -> usize {
        match self.qa.questions.get(self.qa.current_question) {
            Some(q) if q.is_custom => q.options.len(),
            Some(q) => q.selected_option.unwrap_or(0),
            None => 0,
        }
    }

    fn go_to(&mut self, index: usize) {
        self.qa.current_question = index;
        self.cursor = self.initial_cursor();
    }

    fn step(&mut self, forward: bool) {
        let len = self.qa.questions.len();
        if len == 0 {
            return;
        }
        let current = self.qa.current_question;
        let next = if forward {
            (current + 1) % len
        } else {
            (current + len - 1) % len
        };
        self.go_to(next);
    }

    /// Move to the next unanswered question after the current one, if any.
    fn advance(&mut self) {
        let len = self.qa.questions.len();
        let current = self.qa.current_question;
        let next = (1..len)
            .map(|offset| (current + offset) % len)
            .find(|&i| !self.qa.questions[i].is_answered());
        match next {
            Some(index) => self.go_to(index),
            None if self.qa.is_complete() => {
                self.notice = Some("All questions answered. Press Ctrl+S to submit.".into());
            }
            None => {}
        }
    }

    fn activate(&mut self, row: usize) {
        let current = self.qa.current_question;
        let Some(question) = self.qa.questions.get_mut(current) else {
            return;
        };
        self.cursor = row;
        if row == question.options.len() {
            let draft = if question.is_custom {
                question.selected_answer.clone()
            } else {
                String::new()
            };
            self.mode = FormMode::Typing(draft);
            return;
        }
        question.select_option(row);
        self.advance();
    }

    /// Apply one key press.
    pub fn handle(&mut self, key: KeyEvent) -> FormEvent {
        if terminal::is_ctrl_c(&key) {
            return FormEvent::Interrupt;
        }
        self.notice = None;

        match &mut self.mode {
            FormMode::ConfirmAbort => {
                if matches!(key.code, KeyCode::Char('y' | 'Y')) {
                    return FormEvent::Abort;
                }
                self.mode = FormMode::Choosing;
            }
            FormMode::Typing(draft) => match key.code {
                KeyCode::Enter => {
                    let text = draft.trim().to_string();
                    self.mode = FormMode::Choosing;
                    if !text.is_empty() {
                        let current = self.qa.current_question;
                        if let Some(question) = self.qa.questions.get_mut(current) {
                            question.set_custom_answer(text);
                        }
                        self.advance();
                    }
                }
                KeyCode::Esc => self.mode = FormMode::Choosing,
                KeyCode::Backspace => {
                    draft.pop();
                }
                KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => draft.push(c),
                _ => {}
            },
            FormMode::Choosing => match key.code {
                KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    if self.qa.is_complete() {
                        return FormEvent::Submit;
                    }
                    self.notice = Some(format!(
                        "Answer every question before submitting ({}/{} answered).",
                        self.qa.answered_count(),
                        self.qa.len()
                    ));
                }
                KeyCode::Left | KeyCode::BackTab => self.step(false),
                KeyCode::Right | KeyCode::Tab => self.step(true),
                KeyCode::Up => self.cursor = self.cursor.saturating_sub(1),
                KeyCode::Down => self.cursor = (self.cursor + 1).min(self.rows() - 1),
                KeyCode::Enter => self.activate(self.cursor),
                KeyCode::Char(c @ '1'..='9') => {
                    let row = c as usize - '1' as usize;
                    if row < self.rows() {
                        self.activate(row);
                    }
                }
                KeyCode::Esc => self.mode = FormMode::ConfirmAbort,
                _ => {}
            },
        }
        FormEvent::Pending
    }

    /// The form as plain lines, top to bottom.
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Design questions ({}/{} answered)",
            self.qa.answered_count(),
            self.qa.len()
        )];

        let tabs: Vec<String> = self
            .qa
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let mark = if q.is_answered() { "*" } else { "" };
                if i == self.qa.current_question {
                    format!("[Q{}{mark}]", q.id)
                } else {
                    format!(" Q{}{mark} ", q.id)
                }
            })
            .collect();
        lines.push(tabs.join(" "));
        lines.push(String::new());

        if let Some(question) = self.qa.questions.get(self.qa.current_question) {
            lines.push(format!("Q{}: {}", question.id, question.text));
            for (row, option) in question.options.iter().enumerate() {
                let pointer = if row == self.cursor { ">" } else { " " };
                let chosen = if question.selected_option == Some(row) && !question.is_custom {
                    "  (selected)"
                } else {
                    ""
                };
                lines.push(format!("{pointer} {}. {option}{chosen}", row + 1));
            }

            let custom_row = question.options.len();
            let pointer = if self.cursor == custom_row { ">" } else { " " };
            let custom = match &self.mode {
                FormMode::Typing(draft) => format!(": {draft}_"),
                _ if question.is_custom => format!(": {}  (selected)", question.selected_answer),
                _ => String::new(),
            };
            lines.push(format!("{pointer} {}. {CUSTOM_ROW_LABEL}{custom}", custom_row + 1));
        }

        lines.push(String::new());
        lines.push(
            match self.mode {
                FormMode::Choosing => {
                    "Left/Right: question  Up/Down: move  Enter: select  Ctrl+S: submit  Esc: abort"
                }
                FormMode::Typing(_) => "Enter: confirm  Esc: back",
                FormMode::ConfirmAbort => "Abort planning? Press y to confirm, any other key to go back.",
            }
            .to_string(),
        );
        if let Some(notice) = &self.notice {
            lines.push(notice.clone());
        }
        lines
    }
}

/// [`PlanInteraction`] on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalQa;

impl TerminalQa {
    pub fn new() -> Self {
        Self
    }

    fn run_form(qa: &mut QaSession, cancel: &CancelFlag) -> io::Result<QaOutcome> {
        let mut stdout = io::stdout();
        let _guard = TerminalGuard::enter()?;
        let mut form = QaForm::new(qa);
        let mut height = 0;

        loop {
            height = terminal::repaint(&mut stdout, &form.render(), height)?;
            let Some(key) = terminal::next_key(cancel)? else {
                return Ok(QaOutcome::Interrupted);
            };
            match form.handle(key) {
                FormEvent::Pending => {}
                FormEvent::Submit => return Ok(QaOutcome::Completed),
                FormEvent::Abort => return Ok(QaOutcome::Aborted),
                FormEvent::Interrupt => {
                    cancel.cancel();
                    return Ok(QaOutcome::Interrupted);
                }
            }
        }
    }
}

impl PlanInteraction for TerminalQa {
    fn confirm_resume(&mut self, session: &PlanningSession) -> bool {
        println!(
            "Found an unfinished planning session (state: {}).\n  Task: {}",
            session.state, session.task
        );
        matches!(
            terminal::read_choice("Resume it? [y/n] ", &['y', 'n'], None, &CancelFlag::new()),
            Ok(Choice::Picked('y'))
        )
    }

    fn ask_questions(&mut self, qa: &mut QaSession, cancel: &CancelFlag) -> QaOutcome {
        if qa.is_empty() {
            return QaOutcome::Completed;
        }
        println!();
        match Self::run_form(qa, cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Question form failed");
                QaOutcome::Interrupted
            }
        }
    }

    fn approve(&mut self, plan: &str, cancel: &CancelFlag) -> bool {
        println!("\n=== Proposed Plan ===\n");
        let total = plan.lines().count();
        for line in plan.lines().take(PLAN_PREVIEW_LINES) {
            println!("{line}");
        }
        if total > PLAN_PREVIEW_LINES {
            println!("\n... ({} more lines; the full plan goes to plan.md)", total - PLAN_PREVIEW_LINES);
        }
        println!();

        match terminal::read_choice("Approve this plan? [y/n] ", &['y', 'n'], None, cancel) {
            Ok(Choice::Picked(c)) => c == 'y',
            Ok(Choice::Interrupted) => {
                cancel.cancel();
                false
            }
            Ok(Choice::Dismissed) => false,
            Err(e) => {
                warn!(error = %e, "Approval prompt failed");
                false
            }
        }
    }

    fn progress(&mut self, message: &str) {
        println!("[{message}]");
        let _ = io::stdout().flush();
    }
}
