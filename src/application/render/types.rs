use std::{fmt, io, path::PathBuf};

use bytes::Bytes;
use thiserror::Error;

use super::task::TaskId;

/// MIME type of every image this service produces.
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Points per inch; a point is 1/72 inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Intrinsic size of an intermediate document, in typographic points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalSize {
    width_pt: f64,
    height_pt: f64,
}

impl PhysicalSize {
    /// Last-resort estimate used when every probing tier failed. Not a measurement.
    pub const PLACEHOLDER: PhysicalSize = PhysicalSize {
        width_pt: 100.0,
        height_pt: 30.0,
    };

    /// Returns `None` unless both sides are finite and strictly positive.
    pub fn new(width_pt: f64, height_pt: f64) -> Option<Self> {
        let valid = |value: f64| value.is_finite() && value > 0.0;
        (valid(width_pt) && valid(height_pt)).then_some(Self {
            width_pt,
            height_pt,
        })
    }

    pub fn width_pt(&self) -> f64 {
        self.width_pt
    }

    pub fn height_pt(&self) -> f64 {
        self.height_pt
    }
}

impl fmt::Display for PhysicalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x{:.2}pt", self.width_pt, self.height_pt)
    }
}

/// Requested output size in pixels; `None` leaves that axis unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelTarget {
    pub width_px: Option<f64>,
    pub height_px: Option<f64>,
}

impl PixelTarget {
    pub fn new(width_px: Option<f64>, height_px: Option<f64>) -> Self {
        Self {
            width_px,
            height_px,
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.width_px.is_none() && self.height_px.is_none()
    }

    /// Multiply every constrained axis by `factor`.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            width_px: self.width_px.map(|value| value * factor),
            height_px: self.height_px.map(|value| value * factor),
        }
    }
}

/// Where a [`PhysicalSize`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    /// Measured by the named probing tier.
    Measured { tier: &'static str },
    /// Every tier failed; the size is [`PhysicalSize::PLACEHOLDER`].
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeEstimate {
    pub size: PhysicalSize,
    pub source: SizeSource,
}

impl SizeEstimate {
    pub fn measured(size: PhysicalSize, tier: &'static str) -> Self {
        Self {
            size,
            source: SizeSource::Measured { tier },
        }
    }

    pub fn placeholder() -> Self {
        Self {
            size: PhysicalSize::PLACEHOLDER,
            source: SizeSource::Placeholder,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.source, SizeSource::Placeholder)
    }
}

/// Which branch of the pipeline produced an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPath {
    /// No pixel target: compile once, rasterize once.
    SinglePass,
    /// Pixel target: measure, solve the resolution, re-render.
    TwoStep,
}

impl RenderPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderPath::SinglePass => "single_pass",
            RenderPath::TwoStep => "two_step",
        }
    }
}

/// A finished render.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub content: Bytes,
    pub content_type: &'static str,
    pub task_id: TaskId,
    pub path: RenderPath,
    pub dpi: u32,
    /// Present on the two-step path only.
    pub size_estimate: Option<SizeEstimate>,
}

/// Failure taxonomy of the rendering pipeline.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{tool} is not available at `{}`", path.display())]
    ToolUnavailable { tool: &'static str, path: PathBuf },
    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: &'static str, detail: String },
    #[error("TeX compilation failed:\n{}", lines.join("\n"))]
    Compile { lines: Vec<String> },
    #[error("{stage} reported success but produced no output at `{}`", path.display())]
    OutputMissing { stage: &'static str, path: PathBuf },
    #[error("every document size probe failed")]
    DimensionProbeExhausted,
    #[error("scratch file operation failed: {0}")]
    Io(#[from] io::Error),
}

impl RenderError {
    pub fn external(tool: &'static str, detail: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool,
            detail: detail.into(),
        }
    }
}

/// A [`RenderError`] tagged with the task whose artifacts were kept for inspection.
#[derive(Debug, Error)]
#[error("render task {task_id} failed: {source}")]
pub struct RenderFailure {
    pub task_id: TaskId,
    #[source]
    pub source: RenderError,
}
