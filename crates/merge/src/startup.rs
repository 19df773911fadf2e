//! Startup checks for the external tools.
//!
//! Before a run the CLI confirms that ffmpeg and ffprobe can be executed and
//! logs the ffmpeg version. A missing tool is reported but never aborts the
//! run: image groups need neither.

use crate::runner::{CommandRunner, ProcessRunner};
use crate::Config;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{program} not available: {reason}")]
    ToolUnavailable { program: String, reason: String },

    #[error("Could not parse {program} version from output: {first_line}")]
    UnparsableVersion { program: String, first_line: String },
}

/// Result of checking one tool.
#[derive(Debug)]
pub struct ToolCheck {
    pub program: String,
    pub result: Result<String, StartupError>,
}

/// Parse an ffmpeg or ffprobe version banner.
///
/// Handles various version formats:
/// - Standard: "ffmpeg version 8.0 ..."
/// - N-prefixed: "ffmpeg version n8.0-... ..."
///
/// Returns the major version number.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let line = version_output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains(" version "))?;

    let token = line.split(" version ").nth(1)?.split_whitespace().next()?;

    token
        .trim_start_matches('n')
        .split(|c| c == '.' || c == '-')
        .next()?
        .parse()
        .ok()
}

/// Runs `<program> -version` and returns the first line of its banner.
pub async fn check_tool(
    runner: &dyn CommandRunner,
    program: &str,
) -> Result<String, StartupError> {
    let mut cmd = Command::new(program);
    cmd.arg("-version");

    let output = runner
        .run(cmd, VERSION_TIMEOUT)
        .await
        .map_err(|e| StartupError::ToolUnavailable {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    if !output.success() {
        return Err(StartupError::ToolUnavailable {
            program: program.to_string(),
            reason: format!("-version exited with {}", output.status),
        });
    }

    let first_line = output.stdout.lines().next().unwrap_or("").trim().to_string();
    if parse_ffmpeg_version(&output.stdout).is_none() {
        return Err(StartupError::UnparsableVersion {
            program: program.to_string(),
            first_line,
        });
    }
    Ok(first_line)
}

/// Checks every configured tool with the given runner.
pub async fn check_tools_with(runner: &dyn CommandRunner, cfg: &Config) -> Vec<ToolCheck> {
    let mut checks = Vec::new();
    for program in [&cfg.tools.ffmpeg, &cfg.tools.ffprobe] {
        checks.push(ToolCheck {
            program: program.clone(),
            result: check_tool(runner, program).await,
        });
    }
    checks
}

/// Checks every configured tool by spawning it.
pub async fn check_tools(cfg: &Config) -> Vec<ToolCheck> {
    check_tools_with(&ProcessRunner, cfg).await
}
