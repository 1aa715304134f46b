//! Single-pass and two-step rendering over the external-tool stages.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::fs;
use tracing::{info, warn};

use super::{
    document::DocumentAssembler,
    dpi::solve_dpi,
    options::RenderOptions,
    stages::{
        CommandRunner, CompilerStage, DimensionProber, IdentifyProbe, PostProcessRequest,
        PostProcessor, RasterFlags, RasterizerStage, Toolchain,
    },
    task::{TaskId, TaskLifecycle},
    types::{
        PNG_CONTENT_TYPE, RenderError, RenderFailure, RenderOutput, RenderPath, SizeEstimate,
    },
};

pub(crate) const METRIC_RENDER_TOTAL: &str = "texrender_render_total";
pub(crate) const METRIC_RENDER_MS: &str = "texrender_render_ms";

/// Everything the pipeline needs from configuration.
#[derive(Debug, Clone)]
pub struct RenderPipelineConfig {
    pub compiler_path: PathBuf,
    pub rasterizer_path: PathBuf,
    pub image_tool_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub tool_timeout: Duration,
    /// Fail instead of falling back to the placeholder size.
    pub strict_probe: bool,
    pub main_font: String,
    pub cjk_font: Option<String>,
}

impl From<&crate::config::RenderSettings> for RenderPipelineConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            compiler_path: settings.compiler_path.clone(),
            rasterizer_path: settings.rasterizer_path.clone(),
            image_tool_path: settings.image_tool_path.clone(),
            scratch_dir: settings.scratch_dir.clone(),
            tool_timeout: settings.tool_timeout,
            strict_probe: settings.strict_probe,
            main_font: settings.main_font.clone(),
            cjk_font: settings.cjk_font.clone(),
        }
    }
}

/// Renders a formula to image bytes.
#[async_trait]
pub trait RenderService: Send + Sync {
    async fn render(
        &self,
        formula: &str,
        options: &RenderOptions,
    ) -> Result<RenderOutput, RenderFailure>;
}

/// The production pipeline: TeX compiler, PDF rasterizer and optional image tool.
pub struct FormulaRenderer {
    assembler: DocumentAssembler,
    lifecycle: TaskLifecycle,
    compiler: CompilerStage,
    rasterizer: RasterizerStage,
    prober: DimensionProber,
    postprocessor: PostProcessor,
}

impl FormulaRenderer {
    /// Validate the toolchain, then create the scratch directory.
    pub fn new(config: RenderPipelineConfig) -> Result<Self, RenderError> {
        let toolchain = Toolchain::resolve(
            &config.compiler_path,
            &config.rasterizer_path,
            &config.image_tool_path,
        )?;
        std::fs::create_dir_all(&config.scratch_dir)?;

        let scratch_dir = config.scratch_dir;
        let runner = CommandRunner::new(config.tool_timeout);
        let rasterizer =
            RasterizerStage::new(toolchain.rasterizer, scratch_dir.clone(), runner.clone());
        let identify = toolchain.image_tool.clone().map(|program| {
            IdentifyProbe::new(program, scratch_dir.clone(), runner.clone())
        });

        Ok(Self {
            assembler: DocumentAssembler::new(config.main_font, config.cjk_font),
            lifecycle: TaskLifecycle::new(scratch_dir.clone()),
            compiler: CompilerStage::new(toolchain.compiler, scratch_dir.clone(), runner.clone()),
            prober: DimensionProber::standard(rasterizer.clone(), identify, config.strict_probe),
            rasterizer,
            postprocessor: PostProcessor::new(toolchain.image_tool, scratch_dir, runner),
        })
    }

    /// Replace the size probing strategy.
    pub fn with_prober(mut self, prober: DimensionProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        self.lifecycle.scratch_dir()
    }

    async fn single_pass(
        &self,
        task: &TaskId,
        formula: &str,
        options: &RenderOptions,
    ) -> Result<RenderOutput, RenderError> {
        let source = self.assembler.assemble(formula, options);
        let document = self.compiler.compile(task, &source).await?;

        let dpi = options.scaled_resolution();
        let raster = self
            .rasterizer
            .rasterize(task, &document, dpi, raster_flags(options))
            .await?;

        let request = PostProcessRequest {
            width_px: options.target_width_px,
            height_px: options.target_height_px,
            padding_px: options.padding_px,
            scale_factor: options.scale_factor,
        };
        let image = self.postprocessor.process(task, &raster, request).await;

        Ok(RenderOutput {
            content: read_image(&image).await?,
            content_type: PNG_CONTENT_TYPE,
            task_id: task.clone(),
            path: RenderPath::SinglePass,
            dpi,
            size_estimate: None,
        })
    }

    async fn two_step(
        &self,
        task: &TaskId,
        formula: &str,
        options: &RenderOptions,
    ) -> Result<RenderOutput, RenderError> {
        let target = options
            .pixel_target()
            .unwrap_or_default()
            .scaled(options.scale_factor);
        let source = self.assembler.assemble(formula, options);

        // Each step owns its artifacts and releases them whatever the outcome.
        let measure = self.lifecycle.guard(task.step(1));
        let measured = self.measure(measure.task(), &source).await;
        measure.release().await;
        let estimate = measured?;

        let dpi = solve_dpi(estimate.size, target, options.resolution);
        info!(
            target = "application::render::pipeline",
            task_id = %task,
            size = %estimate.size,
            placeholder = estimate.is_placeholder(),
            target_width_px = target.width_px.unwrap_or_default(),
            target_height_px = target.height_px.unwrap_or_default(),
            dpi,
            "Resolution solved for pixel target"
        );

        let render = self.lifecycle.guard(task.step(2));
        let rendered = self.render_at(render.task(), &source, dpi, options).await;
        render.release().await;

        Ok(RenderOutput {
            content: rendered?,
            content_type: PNG_CONTENT_TYPE,
            task_id: task.clone(),
            path: RenderPath::TwoStep,
            dpi,
            size_estimate: Some(estimate),
        })
    }

    async fn measure(&self, task: &TaskId, source: &str) -> Result<SizeEstimate, RenderError> {
        let document = self.compiler.compile(task, source).await?;
        self.prober.probe_size(&document).await
    }

    /// Compile and rasterize at `dpi`. Only padding is applied afterwards; the resolution
    /// already encodes the requested size.
    async fn render_at(
        &self,
        task: &TaskId,
        source: &str,
        dpi: u32,
        options: &RenderOptions,
    ) -> Result<Bytes, RenderError> {
        let document = self.compiler.compile(task, source).await?;
        let raster = self
            .rasterizer
            .rasterize(task, &document, dpi, raster_flags(options))
            .await?;
        let image = self
            .postprocessor
            .process(task, &raster, PostProcessRequest::padding_only(options.padding_px))
            .await;
        read_image(&image).await
    }
}

#[async_trait]
impl RenderService for FormulaRenderer {
    async fn render(
        &self,
        formula: &str,
        options: &RenderOptions,
    ) -> Result<RenderOutput, RenderFailure> {
        let started_at = Instant::now();
        let mut guard = self.lifecycle.guard(self.lifecycle.new_task_id());
        let path = if options.pixel_target().is_some() {
            RenderPath::TwoStep
        } else {
            RenderPath::SinglePass
        };

        let result = match path {
            RenderPath::SinglePass => self.single_pass(guard.task(), formula, options).await,
            RenderPath::TwoStep => self.two_step(guard.task(), formula, options).await,
        };
        let elapsed = started_at.elapsed();
        histogram!(METRIC_RENDER_MS, "path" => path.as_str())
            .record(elapsed.as_secs_f64() * 1000.0);

        match result {
            Ok(output) => {
                counter!(METRIC_RENDER_TOTAL, "path" => path.as_str(), "result" => "ok")
                    .increment(1);
                info!(
                    target = "application::render::pipeline",
                    op = "pipeline::render",
                    result = "ok",
                    task_id = %output.task_id,
                    path = path.as_str(),
                    dpi = output.dpi,
                    bytes = output.content.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Formula rendered"
                );
                guard.release().await;
                Ok(output)
            }
            Err(source) => {
                counter!(METRIC_RENDER_TOTAL, "path" => path.as_str(), "result" => "error")
                    .increment(1);
                guard.retain();
                warn!(
                    target = "application::render::pipeline",
                    op = "pipeline::render",
                    result = "error",
                    task_id = %guard.task(),
                    path = path.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %source,
                    "Formula rendering failed"
                );
                let task_id = guard.task().clone();
                guard.release().await;
                Err(RenderFailure { task_id, source })
            }
        }
    }
}

fn raster_flags(options: &RenderOptions) -> RasterFlags {
    RasterFlags {
        transparent_background: options.transparent_background(),
        crop_to_content: false,
    }
}

async fn read_image(path: &Path) -> Result<Bytes, RenderError> {
    Ok(Bytes::from(fs::read(path).await?))
}
