//! Tool approval prompts on the terminal.

use async_trait::async_trait;
use taskloom_core::cancel::CancelFlag;
use taskloom_security::{ApprovalAnswer, ApprovalPrompter, ApprovalRequest};
use tracing::warn;

use crate::terminal::{self, Choice};

/// Asks y/a/n on stdin. Ctrl+C denies and cancels the running request.
pub struct TerminalApprover {
    cancel: CancelFlag,
}

impl TerminalApprover {
    pub fn new(cancel: CancelFlag) -> Self {
        Self { cancel }
    }
}

/// Map a key choice to an answer.
pub fn answer_for(choice: Choice) -> ApprovalAnswer {
    match choice {
        Choice::Picked('y') => ApprovalAnswer::Once,
        Choice::Picked('a') => ApprovalAnswer::Always,
        _ => ApprovalAnswer::Deny,
    }
}

#[async_trait]
impl ApprovalPrompter for TerminalApprover {
    async fn ask(&self, request: &ApprovalRequest) -> ApprovalAnswer {
        println!("\n[Permission required] {}", request.tool_name);
        println!("  {}", request.target);
        if !request.reason.is_empty() {
            println!("  Reason: {}", request.reason);
        }

        let cancel = self.cancel.clone();
        let read = tokio::task::spawn_blocking(move || {
            terminal::read_choice("Allow? [y]es / [a]lways / [n]o: ", &['y', 'a', 'n'], None, &cancel)
        })
        .await;

        match read {
            Ok(Ok(Choice::Interrupted)) => {
                self.cancel.cancel();
                ApprovalAnswer::Deny
            }
            Ok(Ok(choice)) => answer_for(choice),
            Ok(Err(e)) => {
                warn!(error = %e, "Approval prompt failed");
                ApprovalAnswer::Deny
            }
            Err(e) => {
                warn!(error = %e, "Approval prompt task failed");
                ApprovalAnswer::Deny
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choices_map_to_answers() {
        assert_eq!(answer_for(Choice::Picked('y')), ApprovalAnswer::Once);
        assert_eq!(answer_for(Choice::Picked('a')), ApprovalAnswer::Always);
        assert_eq!(answer_for(Choice::Picked('n')), ApprovalAnswer::Deny);
        assert_eq!(answer_for(Choice::Dismissed), ApprovalAnswer::Deny);
        assert_eq!(answer_for(Choice::Interrupted), ApprovalAnswer::Deny);
    }
}
