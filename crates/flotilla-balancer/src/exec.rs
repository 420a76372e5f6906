//! OS command execution capability.
//!
//! The reconciler never shells out directly; it goes through
//! `CommandRunner`. Non-zero exit status and non-empty stderr are both
//! failures, surfaced as `ExternalCommandError` with the full captured
//! output so callers can pattern-match benign conditions.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A failed external command, with everything it wrote.
#[derive(Debug, Clone, Error)]
#[error("command {command:?} failed: {stderr}")]
pub struct ExternalCommandError {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

/// Asynchronous shell-command execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ExternalCommandError>;
}

/// Runs commands through `sh -c`.
#[derive(Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ExternalCommandError> {
        debug!(command, "executing");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExternalCommandError {
                command: command.to_string(),
                stdout: String::new(),
                stderr: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() || !stderr.trim().is_empty() {
            return Err(ExternalCommandError {
                command: command.to_string(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

/// Scripted runner for tests: commands matching a registered substring
/// return the scripted result, everything else succeeds with empty
/// output. Every executed command line is recorded.
#[derive(Default)]
pub struct FakeRunner {
    script: Mutex<VecDeque<(String, Result<CommandOutput, ExternalCommandError>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result for the next command containing `pattern`.
    pub fn on(&self, pattern: &str, result: Result<CommandOutput, ExternalCommandError>) {
        self.script
            .lock()
            .unwrap()
            .push_back((pattern.to_string(), result));
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// How many executed commands contained `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ExternalCommandError> {
        self.calls.lock().unwrap().push(command.to_string());

        let mut script = self.script.lock().unwrap();
        if let Some(position) = script
            .iter()
            .position(|(pattern, _)| command.contains(pattern.as_str()))
        {
            let (_, result) = script.remove(position).expect("position is in range");
            return result;
        }
        Ok(CommandOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_runner_captures_stdout() {
        let runner = ShellRunner::new();
        let output = runner.execute("echo hello").await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let runner = ShellRunner::new();
        let err = runner.execute("exit 3").await.unwrap_err();
        assert_eq!(err.command, "exit 3");
    }

    #[tokio::test]
    async fn stderr_output_is_an_error_even_on_zero_exit() {
        let runner = ShellRunner::new();
        let err = runner.execute("echo warning >&2").await.unwrap_err();
        assert_eq!(err.stderr.trim(), "warning");
    }

    #[tokio::test]
    async fn fake_runner_scripts_and_records() {
        let runner = FakeRunner::new();
        runner.on(
            "reload",
            Err(ExternalCommandError {
                command: "nginx -s reload".to_string(),
                stdout: String::new(),
                stderr: "boom".to_string(),
            }),
        );

        assert!(runner.execute("nginx -c /tmp/conf").await.is_ok());
        assert!(runner.execute("nginx -s reload").await.is_err());
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(runner.count_matching("reload"), 1);
    }
}
