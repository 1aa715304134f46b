use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::application::render::types::RenderError;

pub const COMPILER: &str = "compiler";
pub const RASTERIZER: &str = "rasterizer";
pub const IMAGE_TOOL: &str = "image tool";

/// Absolute locations of the external programs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub compiler: PathBuf,
    pub rasterizer: PathBuf,
    /// Optional: without it post-processing and the identify probe are skipped.
    pub image_tool: Option<PathBuf>,
}

impl Toolchain {
    /// Resolve configured paths. The compiler and rasterizer are required.
    pub fn resolve(
        compiler: &Path,
        rasterizer: &Path,
        image_tool: &Path,
    ) -> Result<Self, RenderError> {
        let compiler = require(COMPILER, compiler)?;
        let rasterizer = require(RASTERIZER, rasterizer)?;
        let image_tool = match locate(image_tool) {
            Some(path) => Some(path),
            None => {
                warn!(
                    target = "application::render::toolchain",
                    tool = IMAGE_TOOL,
                    path = %image_tool.display(),
                    "Image tool not found; post-processing and identify probing disabled"
                );
                None
            }
        };

        info!(
            target = "application::render::toolchain",
            compiler = %compiler.display(),
            rasterizer = %rasterizer.display(),
            image_tool = image_tool
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
            "Toolchain resolved"
        );

        Ok(Self {
            compiler,
            rasterizer,
            image_tool,
        })
    }
}

fn require(tool: &'static str, configured: &Path) -> Result<PathBuf, RenderError> {
    locate(configured).ok_or_else(|| RenderError::ToolUnavailable {
        tool,
        path: configured.to_path_buf(),
    })
}

/// A path with more than one component must exist; a bare name is looked up on `PATH`.
fn locate(configured: &Path) -> Option<PathBuf> {
    locate_on(configured, env::var_os("PATH"))
}

fn locate_on(configured: &Path, search_path: Option<OsString>) -> Option<PathBuf> {
    if configured.as_os_str().is_empty() {
        return None;
    }
    if configured.components().count() > 1 || configured.is_absolute() {
        return configured.is_file().then(|| configured.to_path_buf());
    }

    let cwd = env::current_dir().ok()?;
    match which::which_in(configured, search_path, cwd) {
        Ok(path) => Some(path),
        Err(err) => {
            debug!(
                target = "application::render::toolchain",
                program = %configured.display(),
                error = %err,
                "Program not found on PATH"
            );
            None
        }
    }
}
