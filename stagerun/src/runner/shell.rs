//! Runs commands through the platform shell.

use super::{CommandInvocation, CommandOutput, CommandRunner};
use crate::errors::ExecutionError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs each command with `sh -c` (`cmd /C` on Windows), capturing output.
///
/// Standard input is closed. The command inherits the engine's environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellCommandRunner;

impl ShellCommandRunner {
    /// Creates a new shell runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &str) -> Command {
        #[cfg(windows)]
        {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(cmd);
            command
        }
        #[cfg(not(windows))]
        {
            let mut command = Command::new("sh");
            command.arg("-c").arg(cmd);
            command
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ExecutionError> {
        debug!(stage = %invocation.stage, cmd = %invocation.cmd, "Spawning shell command");

        let output = Self::command(&invocation.cmd)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExecutionError::Launch(format!("{}: {e}", invocation.cmd)))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
