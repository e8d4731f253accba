//! Raw-mode key input for the interactive prompts.

use std::io::{self, Write};
use std::time::Duration;

use crossterm::cursor;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode};
use crossterm::queue;
use taskloom_core::cancel::CancelFlag;

/// How often a blocked key read looks at the cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Restores cooked mode on drop (including panics).
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = crossterm::execute!(io::stdout(), cursor::Show);
    }
}

pub fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Block until a key is pressed. `None` once `cancel` is raised.
pub fn next_key(cancel: &CancelFlag) -> io::Result<Option<KeyEvent>> {
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        if let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            return Ok(Some(key));
        }
    }
}

/// Answer to a single-letter prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Picked(char),
    /// Esc
    Dismissed,
    /// Ctrl+C, or the cancel flag was raised elsewhere
    Interrupted,
}

/// Ask for one of `choices` (lowercase letters). Enter picks `default`.
pub fn read_choice(
    prompt: &str,
    choices: &[char],
    default: Option<char>,
    cancel: &CancelFlag,
) -> io::Result<Choice> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}")?;
    stdout.flush()?;

    let choice = {
        let _guard = TerminalGuard::enter()?;
        loop {
            let Some(key) = next_key(cancel)? else {
                break Choice::Interrupted;
            };
            if is_ctrl_c(&key) {
                break Choice::Interrupted;
            }
            match key.code {
                KeyCode::Esc => break Choice::Dismissed,
                KeyCode::Enter => {
                    if let Some(c) = default {
                        break Choice::Picked(c);
                    }
                }
                KeyCode::Char(c) => {
                    let c = c.to_ascii_lowercase();
                    if choices.contains(&c) {
                        break Choice::Picked(c);
                    }
                }
                _ => {}
            }
        }
    };

    match choice {
        Choice::Picked(c) => writeln!(stdout, "{c}")?,
        Choice::Dismissed | Choice::Interrupted => writeln!(stdout)?,
    }
    Ok(choice)
}

/// Repaint a block of lines in place. `previous` is the height of the last
/// paint; returns the height of this one. Only valid in raw mode.
pub fn repaint(out: &mut impl Write, lines: &[String], previous: usize) -> io::Result<usize> {
    if previous > 0 {
        let up = u16::try_from(previous).unwrap_or(u16::MAX);
        queue!(out, cursor::MoveToPreviousLine(up))?;
    }
    queue!(out, cursor::MoveToColumn(0), Clear(ClearType::FromCursorDown))?;
    for line in lines {
        queue!(out, Print(line), Print("\r\n"))?;
    }
    out.flush()?;
    Ok(lines.len())
}
