//! Utility functions for scheduler command execution.

use anyhow::{Context, Result};
use std::process::Command;

/// Result of running an external command
#[derive(Debug)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
}

/// Execute an external command and return stdout, stderr, and return code.
///
/// A non-zero exit is not an error here; callers decide what the return
/// code means for them.
pub fn run_command(cmd: &[&str]) -> Result<CommandResult> {
    if cmd.is_empty() {
        anyhow::bail!("Empty command");
    }

    let output = Command::new(cmd[0])
        .args(&cmd[1..])
        .output()
        .with_context(|| format!("Failed to execute command: {}", cmd[0]))?;

    Ok(CommandResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        return_code: output.status.code().unwrap_or(-1),
    })
}
