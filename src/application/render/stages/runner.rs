use std::{
    ffi::OsStr,
    io,
    path::Path,
    process::Stdio,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::render::types::RenderError;

/// Benign stderr warning emitted by the TeX compiler when shell escape is restricted.
pub const BENIGN_WARNING: &str = "security risk";
/// Compiler stdout line confirming that the output document was written.
pub const OUTPUT_CONFIRMATION: &str = "Output written on";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        combined.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&self.stderr);
        combined
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with code {}: {}", display_code(*exit_code), stderr.trim())]
    Exit {
        program: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("`{program}` timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

impl RunError {
    pub fn into_tool_error(self, tool: &'static str) -> RenderError {
        RenderError::external(tool, self.to_string())
    }
}

fn display_code(code: Option<i32>) -> String {
    code.map(|code| code.to_string())
        .unwrap_or_else(|| "none (killed by signal)".to_string())
}

/// Whether a finished process counts as successful.
///
/// A non-zero exit still succeeds when stderr carries the benign security warning and
/// stdout confirms the output was written.
pub fn exit_accepted(success: bool, stdout: &str, stderr: &str) -> bool {
    success || (stderr.contains(BENIGN_WARNING) && stdout.contains(OUTPUT_CONFIRMATION))
}

/// Runs external programs with captured output and a hard timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn run<I, S>(
        &self,
        program: &Path,
        args: I,
        working_dir: &Path,
    ) -> Result<CommandOutput, RunError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let started_at = Instant::now();
        let program_name = program.display().to_string();

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                warn!(
                    target = "application::render::runner",
                    op = "runner::run",
                    result = "error",
                    program = %program_name,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn",
                    error = %source,
                    "Failed to spawn external tool"
                );
                return Err(RunError::Spawn {
                    program: program_name,
                    source,
                });
            }
            Err(_) => {
                warn!(
                    target = "application::render::runner",
                    op = "runner::run",
                    result = "error",
                    program = %program_name,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "timeout",
                    "External tool timed out"
                );
                return Err(RunError::TimedOut {
                    program: program_name,
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        if !exit_accepted(output.status.success(), &stdout, &stderr) {
            debug!(
                target = "application::render::runner",
                op = "runner::run",
                result = "error",
                program = %program_name,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "exit_status",
                "External tool exited abnormally"
            );
            return Err(RunError::Exit {
                program: program_name,
                exit_code,
                stdout,
                stderr,
            });
        }

        debug!(
            target = "application::render::runner",
            op = "runner::run",
            result = if output.status.success() { "ok" } else { "ok_benign_warning" },
            program = %program_name,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            exit_code = exit_code.map(i64::from).unwrap_or(-1),
            "External tool finished"
        );

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}
