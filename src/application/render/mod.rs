//! Formula rendering: TeX source assembly, external-tool stages and the pipeline that
//! sequences them.
//!
//! A render with no pixel target compiles and rasterizes once. A render with a pixel
//! target compiles once to measure the document, solves the resolution that hits the
//! target, then compiles and rasterizes again at that resolution.

mod document;
mod dpi;
mod formula;
mod options;
mod pipeline;
mod stages;
mod task;
mod types;

pub use document::DocumentAssembler;
pub use dpi::{MAX_DPI, MIN_DPI, pixels_at, solve_dpi};
pub use formula::{Formula, FormulaFeatures, FormulaKind, font_size_command};
pub use options::{
    Background, Color, DEFAULT_RESOLUTION, FieldValue, OptionsError, RawRenderOptions,
    RenderOptions,
};
pub use pipeline::{FormulaRenderer, RenderPipelineConfig, RenderService};
pub use stages::{
    BENIGN_WARNING, COMPILER, CommandOutput, CommandRunner, CompilerStage, DimensionProber,
    GeometryReportProbe, IMAGE_TOOL, IdentifyProbe, OUTPUT_CONFIRMATION, PostProcessRequest,
    PostProcessor, ProbeError, RASTERIZER, RasterFlags, RasterMeasureProbe, RasterizerStage,
    RunError, SizeProbe, Toolchain, exit_accepted, extract_diagnostics, parse_identify,
    parse_points_geometry,
};
pub use task::{ARTIFACT_SUFFIXES, TaskGuard, TaskId, TaskLifecycle};
pub use types::{
    PNG_CONTENT_TYPE, POINTS_PER_INCH, PhysicalSize, PixelTarget, RenderError, RenderFailure,
    RenderOutput, RenderPath, SizeEstimate, SizeSource,
};
