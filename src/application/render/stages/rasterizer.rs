use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use tokio::fs;
use tracing::info;

use super::{
    runner::{CommandOutput, CommandRunner, RunError},
    toolchain::RASTERIZER,
};
use crate::application::render::{task::TaskId, types::RenderError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RasterFlags {
    pub transparent_background: bool,
    /// Crop the page to its content box.
    pub crop_to_content: bool,
}

/// Turns an intermediate PDF into a PNG at a given resolution.
#[derive(Debug, Clone)]
pub struct RasterizerStage {
    program: PathBuf,
    scratch_dir: PathBuf,
    runner: CommandRunner,
}

impl RasterizerStage {
    pub fn new(program: PathBuf, scratch_dir: PathBuf, runner: CommandRunner) -> Self {
        Self {
            program,
            scratch_dir,
            runner,
        }
    }

    pub async fn rasterize(
        &self,
        task: &TaskId,
        document: &Path,
        dpi: u32,
        flags: RasterFlags,
    ) -> Result<PathBuf, RenderError> {
        let started_at = Instant::now();
        self.invoke(document, task.as_str(), dpi, flags)
            .await
            .map_err(|err| err.into_tool_error(RASTERIZER))?;

        let raster = self.locate_output(task.as_str()).await.ok_or_else(|| {
            RenderError::OutputMissing {
                stage: RASTERIZER,
                path: self.scratch_dir.join(task.artifact("-1.png")),
            }
        })?;

        info!(
            target = "application::render::rasterizer",
            op = "rasterizer::rasterize",
            result = "ok",
            task_id = %task,
            dpi,
            transparent = flags.transparent_background,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output = %raster.display(),
            "Document rasterized"
        );
        Ok(raster)
    }

    /// Run the rasterizer writing to `{output_base}-1.png` or `{output_base}.png`.
    pub(crate) async fn invoke(
        &self,
        document: &Path,
        output_base: &str,
        dpi: u32,
        flags: RasterFlags,
    ) -> Result<CommandOutput, RunError> {
        let mut args: Vec<String> = vec!["-png".into(), "-r".into(), dpi.to_string()];
        if flags.transparent_background {
            args.push("-transparent".into());
        }
        if flags.crop_to_content {
            args.push("-cropbox".into());
        }
        args.push(document_arg(document));
        args.push(output_base.to_string());

        self.runner.run(&self.program, &args, &self.scratch_dir).await
    }

    /// The tool appends a page suffix for multi-page output; probe both spellings.
    pub(crate) async fn locate_output(&self, output_base: &str) -> Option<PathBuf> {
        for candidate in raster_candidates(&self.scratch_dir, output_base) {
            if fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }

    pub(crate) async fn remove_outputs(&self, output_base: &str) {
        for candidate in raster_candidates(&self.scratch_dir, output_base) {
            let _ = fs::remove_file(candidate).await;
        }
    }
}

fn raster_candidates(dir: &Path, output_base: &str) -> [PathBuf; 2] {
    [
        dir.join(format!("{output_base}-1.png")),
        dir.join(format!("{output_base}.png")),
    ]
}

/// Documents inside the scratch directory are passed by file name.
fn document_arg(document: &Path) -> String {
    document
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.display().to_string())
}
