//! Command execution boundary.
//!
//! The executor never spawns processes itself. It hands a
//! [`CommandInvocation`] to a [`CommandRunner`] and interprets the
//! [`CommandOutput`].

mod shell;

use crate::errors::ExecutionError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

pub use shell::ShellCommandRunner;

/// A request to run one stage's command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// The stage the command belongs to.
    pub stage: String,
    /// The opaque command text.
    pub cmd: String,
    /// Directory the command runs in.
    pub working_dir: PathBuf,
}

impl CommandInvocation {
    /// Creates a new invocation.
    #[must_use]
    pub fn new(stage: impl Into<String>, cmd: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            stage: stage.into(),
            cmd: cmd.into(),
            working_dir: working_dir.into(),
        }
    }
}

/// The result of a command that was started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with no output.
    #[must_use]
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A run that exited with `code` and wrote `stderr`.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Combined diagnostics for a failure report, stderr first.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        match (self.stderr.trim(), self.stdout.trim()) {
            ("", "") => String::new(),
            (err, "") => err.to_string(),
            ("", out) => out.to_string(),
            (err, out) => format!("{err}\n{out}"),
        }
    }
}

/// Runs stage commands.
///
/// Implementations must be safe to call from many tasks at once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Launch` if the command could not be started.
    /// A command that starts and exits non-zero is reported through
    /// [`CommandOutput::exit_code`], not as an error.
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_output_success() {
        assert!(CommandOutput::success().is_success());
        assert!(!CommandOutput::failure(1, "boom").is_success());
        assert!(!CommandOutput::default().is_success());
    }

    #[test]
    fn test_diagnostics_prefers_stderr() {
        let output = CommandOutput {
            exit_code: Some(1),
            stdout: "partial\n".into(),
            stderr: "error: bad input\n".into(),
        };
        assert_eq!(output.diagnostics(), "error: bad input\npartial");
        assert_eq!(CommandOutput::failure(2, "  only err ").diagnostics(), "only err");
        assert_eq!(CommandOutput::success().diagnostics(), "");
    }

    #[test]
    fn test_mock_runner() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.stage == "train")
            .times(1)
            .returning(|_| Ok(CommandOutput::success()));

        let inv = CommandInvocation::new("train", "python train.py", ".");
        let output = tokio_test::block_on(runner.run(&inv)).unwrap();
        assert!(output.is_success());
    }
}
