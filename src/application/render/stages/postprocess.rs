use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use tokio::fs;
use tracing::{debug, info, warn};

use super::{runner::CommandRunner, toolchain::IMAGE_TOOL};
use crate::application::render::task::TaskId;

/// Adjustments applied to a finished raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessRequest {
    pub width_px: Option<u32>,
    pub height_px: Option<u32>,
    pub padding_px: u32,
    pub scale_factor: f64,
}

impl PostProcessRequest {
    /// Padding only; the resolution already encodes the requested size.
    pub fn padding_only(padding_px: u32) -> Self {
        Self {
            width_px: None,
            height_px: None,
            padding_px,
            scale_factor: 1.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.width_px.is_some() || self.height_px.is_some() || self.padding_px > 0
    }

    /// `-resize` geometry: proportional for one axis, forced aspect for both.
    pub fn resize_geometry(&self) -> Option<String> {
        let scale = |value: u32| ((f64::from(value) * self.scale_factor).round() as u32).max(1);
        match (self.width_px.map(scale), self.height_px.map(scale)) {
            (Some(width), Some(height)) => Some(format!("{width}x{height}!")),
            (Some(width), None) => Some(format!("{width}x")),
            (None, Some(height)) => Some(format!("x{height}")),
            (None, None) => None,
        }
    }

    fn arguments(&self, input: &str, output: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "convert".into(),
            input.to_string(),
            "-trim".into(),
            "+repage".into(),
        ];
        if let Some(geometry) = self.resize_geometry() {
            args.push("-resize".into());
            args.push(geometry);
        }
        if self.padding_px > 0 {
            args.extend([
                "-bordercolor".to_string(),
                "transparent".to_string(),
                "-border".to_string(),
                self.padding_px.to_string(),
            ]);
        }
        args.push(output.to_string());
        args
    }
}

/// Trim, resize and pad a raster. Every failure falls back to the unprocessed input.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    image_tool: Option<PathBuf>,
    scratch_dir: PathBuf,
    runner: CommandRunner,
}

impl PostProcessor {
    pub fn new(image_tool: Option<PathBuf>, scratch_dir: PathBuf, runner: CommandRunner) -> Self {
        Self {
            image_tool,
            scratch_dir,
            runner,
        }
    }

    pub async fn process(
        &self,
        task: &TaskId,
        raster: &Path,
        request: PostProcessRequest,
    ) -> PathBuf {
        if !request.is_active() {
            return raster.to_path_buf();
        }
        let Some(program) = self.image_tool.as_deref() else {
            warn!(
                target = "application::render::postprocess",
                task_id = %task,
                "Image tool unavailable; returning unprocessed raster"
            );
            return raster.to_path_buf();
        };

        let started_at = Instant::now();
        let output_name = task.artifact("_processed.png");
        let output_path = self.scratch_dir.join(&output_name);
        let input_name = raster
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| raster.display().to_string());
        let args = request.arguments(&input_name, &output_name);

        match self.runner.run(program, &args, &self.scratch_dir).await {
            Ok(_) if fs::try_exists(&output_path).await.unwrap_or(false) => {
                info!(
                    target = "application::render::postprocess",
                    op = "postprocess::process",
                    result = "ok",
                    task_id = %task,
                    padding_px = request.padding_px,
                    resize = request.resize_geometry().unwrap_or_default(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Raster post-processed"
                );
                output_path
            }
            Ok(_) => {
                warn!(
                    target = "application::render::postprocess",
                    op = "postprocess::process",
                    result = "fallback",
                    task_id = %task,
                    tool = IMAGE_TOOL,
                    "Image tool produced no output; returning unprocessed raster"
                );
                raster.to_path_buf()
            }
            Err(err) => {
                warn!(
                    target = "application::render::postprocess",
                    op = "postprocess::process",
                    result = "fallback",
                    task_id = %task,
                    tool = IMAGE_TOOL,
                    error = %err,
                    "Post-processing failed; returning unprocessed raster"
                );
                debug!(
                    target = "application::render::postprocess",
                    args = ?args,
                    "Failed post-processing invocation"
                );
                raster.to_path_buf()
            }
        }
    }
}
