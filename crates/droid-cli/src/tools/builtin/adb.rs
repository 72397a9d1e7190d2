//! ADB device command tool

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::tools::{ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};

/// Tool for running adb commands against a connected device
pub struct AdbTool;

#[async_trait]
impl Tool for AdbTool {
    fn name(&self) -> &str {
        "adb"
    }

    fn description(&self) -> &str {
        "Run an adb command against the connected device. Pass the command without the leading \
         'adb'. Examples: 'devices -l' to list connected devices, 'shell pm list packages' to \
         list installed packages."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "command",
            ParameterProperty::string("The adb command without the 'adb' prefix"),
        )
    }

    fn timeout(&self, ctx: &ToolContext) -> Duration {
        // Backstop above the handler's own timeout so the specific error wins.
        Duration::from_secs(ctx.adb_timeout_secs + 5)
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: command"))?;

        let argv = split_command(command);
        if argv.is_empty() {
            return Ok(ToolResult::error("Empty adb command"));
        }

        let display_cmd = format!("adb {}", command.trim());
        debug!(command = %display_cmd, timeout_secs = ctx.adb_timeout_secs, "Running adb");

        // Argument-vector invocation; the command string is never handed to
        // a shell.
        let mut cmd = Command::new("adb");
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match timeout(Duration::from_secs(ctx.adb_timeout_secs), cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let stdout = truncate_output(stdout, ctx.max_output_len);
                let success = output.status.success();

                let payload = json!({
                    "command": display_cmd,
                    "output": stdout,
                    "error": if stderr.is_empty() { Value::Null } else { Value::String(stderr) },
                    "success": success,
                });
                let payload =
                    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| display_cmd.clone());

                if success {
                    Ok(ToolResult::success(payload))
                } else {
                    let code = output
                        .status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    Ok(ToolResult::failure(
                        payload,
                        format!("adb exited with code {}", code),
                    ))
                }
            }
            Ok(Err(e)) => Ok(ToolResult::error(format!("Failed to run adb: {}", e))),
            Err(_) => Ok(ToolResult::error(format!(
                "adb command timed out after {} seconds",
                ctx.adb_timeout_secs
            ))),
        }
    }
}

/// Split a command string into an argument vector without invoking a shell.
/// Single and double quotes group words; there is no variable expansion or
/// globbing.
fn split_command(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut has_token = false;

    for c in input.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    has_token = true;
                }
                c if c.is_whitespace() => {
                    if has_token {
                        args.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                c => {
                    current.push(c);
                    has_token = true;
                }
            },
        }
    }

    if has_token {
        args.push(current);
    }
    args
}

fn truncate_output(output: String, max_len: usize) -> String {
    if output.len() <= max_len {
        return output;
    }

    let safe_end = output
        .char_indices()
        .take_while(|(idx, _)| *idx < max_len)
        .last()
        .map(|(idx, c)| idx + c.len_utf8())
        .unwrap_or(0);
    format!(
        "{}\n\n[Output truncated at {} characters]",
        &output[..safe_end],
        safe_end
    )
}
