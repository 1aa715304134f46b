//! External-tool stages of the rendering pipeline.

mod compiler;
#[cfg(all(test, unix))]
mod fake_tool;
mod postprocess;
mod probe;
mod rasterizer;
mod runner;
mod toolchain;

pub use compiler::{CompilerStage, extract_diagnostics};
pub use postprocess::{PostProcessRequest, PostProcessor};
pub use probe::{
    DimensionProber, GeometryReportProbe, IdentifyProbe, ProbeError, RasterMeasureProbe,
    SizeProbe, parse_identify, parse_points_geometry,
};
pub use rasterizer::{RasterFlags, RasterizerStage};
pub use runner::{
    BENIGN_WARNING, CommandOutput, CommandRunner, OUTPUT_CONFIRMATION, RunError, exit_accepted,
};
pub use toolchain::{COMPILER, IMAGE_TOOL, RASTERIZER, Toolchain};
