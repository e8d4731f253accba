//! Bash tool: execute shell commands in the working directory.
//!
//! The child process is killed when the call times out or the
//! cancellation flag is raised. Long output is collapsed to its head and
//! tail so a noisy build cannot flood the conversation.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext, ToolResult};
use tokio::process::Command;
use tracing::{debug, warn};

pub const MAX_OUTPUT_CHARS: usize = 30_000;
pub const MAX_OUTPUT_LINES: usize = 50;

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and return its combined stdout/stderr. \
         Use this for builds, tests, git operations and inspecting the system. \
         Very long output is truncated to the first and last lines."
    }

    fn signature(&self) -> &str {
        "bash(command: string, timeout?: int)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (defaults to the agent's tool timeout)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        let timeout = arguments["timeout"]
            .as_u64()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(ctx.timeout);

        debug!(command = %command, cwd = %ctx.working_dir.display(), "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "bash".into(),
            reason: e.to_string(),
        })?;

        // Dropping the wait future drops the child, and kill_on_drop reaps it.
        let output = tokio::select! {
            out = child.wait_with_output() => out.map_err(|e| ToolError::ExecutionFailed {
                tool_name: "bash".into(),
                reason: e.to_string(),
            })?,
            _ = tokio::time::sleep(timeout) => {
                warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "Command timed out");
                return Ok(ToolResult::failure(format!(
                    "Command timed out after {}ms",
                    timeout.as_millis()
                )));
            }
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Cancelled);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let text = if stderr.trim().is_empty() {
                stdout.to_string()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            let text = text.trim();
            let text = if text.is_empty() { "(no output)" } else { text };
            Ok(ToolResult::success(truncate_output(text)))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            let text = format!("{stdout}\n{stderr}").trim().to_string();
            Ok(ToolResult::failure_with_output(
                truncate_output(&format!("{text}\n[exit code: {code}]")),
                format!("command exited with code {code}"),
            ))
        }
    }
}

/// Collapse output longer than [`MAX_OUTPUT_CHARS`] to its first and last lines.
pub fn truncate_output(text: &str) -> String {
    if text.chars().count() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    let collapsed = if lines.len() > MAX_OUTPUT_LINES {
        let keep = MAX_OUTPUT_LINES / 2;
        let omitted = lines.len() - 2 * keep;
        format!(
            "{}\n\n... [{omitted} lines truncated] ...\n\n{}",
            lines[..keep].join("\n"),
            lines[lines.len() - keep..].join("\n")
        )
    } else {
        text.to_string()
    };

    if collapsed.chars().count() <= MAX_OUTPUT_CHARS {
        collapsed
    } else {
        let cut: String = collapsed.chars().take(MAX_OUTPUT_CHARS).collect();
        format!("{cut}\n... [output truncated]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_core::CancelFlag;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(dir)
    }

    #[tokio::test]
    async fn execute_echo_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let result = BashTool
            .execute(serde_json::json!({"command": "echo hello && ls"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("hello"));
        assert!(result.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = BashTool
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("oops"));
        assert!(result.output.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let result = BashTool
            .execute(
                serde_json::json!({"command": "sleep 5", "timeout": 100}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_stops_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = ctx(dir.path());
        let cancel = CancelFlag::new();
        context.cancel = cancel.clone();

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let result = BashTool
            .execute(serde_json::json!({"command": "sleep 5"}), &context)
            .await;
        trigger.await.unwrap();
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }

    #[tokio::test]
    async fn missing_command_is_invalid() {
        let result = BashTool
            .execute(serde_json::json!({}), &ctx(std::path::Path::new("/tmp")))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("a\nb"), "a\nb");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let text: String = (0..2000).map(|i| format!("line {i} {}\n", "x".repeat(40))).collect();
        let out = truncate_output(&text);
        assert!(out.starts_with("line 0 "));
        assert!(out.contains("line 24 "));
        assert!(!out.contains("line 25 "));
        assert!(out.contains("[1950 lines truncated]"));
        assert!(out.trim_end().ends_with(&"x".repeat(40)));
        assert!(out.contains("line 1999 "));
    }

    #[test]
    fn single_huge_line_is_cut() {
        let text = "y".repeat(MAX_OUTPUT_CHARS + 10);
        let out = truncate_output(&text);
        assert!(out.ends_with("[output truncated]"));
    }
}
