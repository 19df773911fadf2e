//! External command execution with time bounds.
//!
//! Compositors build a [`std::process::Command`] and hand it to a
//! [`CommandRunner`]. The production runner spawns it through tokio and kills
//! it when the bound expires; tests substitute a scripted runner.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Number of stderr lines kept in failure messages.
const STDERR_TAIL_LINES: usize = 5;

/// Errors that prevent a command from producing an exit status.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The executable could not be found.
    #[error("{program} not found; install it or set its path in the config")]
    NotFound { program: String },

    /// The command ran longer than its bound and was killed.
    #[error("{program} timed out after {}s", .limit.as_secs())]
    Timeout { program: String, limit: Duration },

    /// Any other IO error while spawning or waiting.
    #[error("{program} could not be run: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Last few stderr lines, joined for a one-line log message.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join(" | ")
    }
}

/// Returns the program name of a command as a string.
pub fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Runs an external command to completion within a time bound.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: Command, limit: Duration) -> Result<ToolOutput, ToolError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: Command, limit: Duration) -> Result<ToolOutput, ToolError> {
        let program = program_name(&cmd);
        let mut cmd = tokio::process::Command::from(cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %program, "Spawning external command");

        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ToolError::NotFound {
                program: program.clone(),
            },
            _ => ToolError::Io {
                program: program.clone(),
                source: e,
            },
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ToolOutput {
                status: output.status,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(ToolError::Io { program, source: e }),
            Err(_) => Err(ToolError::Timeout { program, limit }),
        }
    }
}
