use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use tokio::fs;
use tracing::{info, warn};

use super::{runner::CommandRunner, toolchain::COMPILER};
use crate::application::render::{task::TaskId, types::RenderError};

const ERROR_MARKERS: &[&str] = &["!", "Error", "Missing", "not found"];
const DIAGNOSTIC_LINES: usize = 5;

/// Turns TeX source into an intermediate PDF document, single pass.
#[derive(Debug, Clone)]
pub struct CompilerStage {
    program: PathBuf,
    scratch_dir: PathBuf,
    runner: CommandRunner,
}

impl CompilerStage {
    pub fn new(program: PathBuf, scratch_dir: PathBuf, runner: CommandRunner) -> Self {
        Self {
            program,
            scratch_dir,
            runner,
        }
    }

    pub async fn compile(&self, task: &TaskId, source: &str) -> Result<PathBuf, RenderError> {
        let started_at = Instant::now();
        let tex_name = task.artifact(".tex");
        let pdf_path = self.scratch_dir.join(task.artifact(".pdf"));

        fs::write(self.scratch_dir.join(&tex_name), source).await?;

        let args = ["-interaction=nonstopmode", "-file-line-error", tex_name.as_str()];
        if let Err(err) = self.runner.run(&self.program, args, &self.scratch_dir).await {
            let log_path = self.scratch_dir.join(task.artifact(".log"));
            let diagnostics = read_diagnostics(&log_path).await;
            warn!(
                target = "application::render::compiler",
                op = "compiler::compile",
                result = "error",
                task_id = %task,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                diagnostics = diagnostics.len(),
                error = %err,
                "TeX compilation failed"
            );
            if diagnostics.is_empty() {
                return Err(err.into_tool_error(COMPILER));
            }
            return Err(RenderError::Compile { lines: diagnostics });
        }

        if !fs::try_exists(&pdf_path).await.unwrap_or(false) {
            return Err(RenderError::OutputMissing {
                stage: COMPILER,
                path: pdf_path,
            });
        }

        info!(
            target = "application::render::compiler",
            op = "compiler::compile",
            result = "ok",
            task_id = %task,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "TeX source compiled"
        );
        Ok(pdf_path)
    }
}

/// Unreadable logs yield no diagnostics rather than an error.
async fn read_diagnostics(log_path: &Path) -> Vec<String> {
    match fs::read(log_path).await {
        Ok(bytes) => extract_diagnostics(&String::from_utf8_lossy(&bytes)),
        Err(err) => {
            warn!(
                target = "application::render::compiler",
                path = %log_path.display(),
                error = %err,
                "Could not read compiler log"
            );
            Vec::new()
        }
    }
}

/// Last few log lines that look like errors.
pub fn extract_diagnostics(log: &str) -> Vec<String> {
    let matching: Vec<&str> = log
        .lines()
        .filter(|line| ERROR_MARKERS.iter().any(|marker| line.contains(marker)))
        .collect();
    let skip = matching.len().saturating_sub(DIAGNOSTIC_LINES);
    matching[skip..].iter().map(|line| line.to_string()).collect()
}
