//! Intrinsic document size probing, as an ordered list of strategies.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imagesize::ImageError;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    rasterizer::{RasterFlags, RasterizerStage},
    runner::{CommandRunner, RunError},
};
use crate::application::render::types::{PhysicalSize, RenderError, SizeEstimate};

/// Rendering at 72 DPI makes one pixel exactly one point.
const MEASURE_DPI: u32 = 72;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Tool(#[from] RunError),
    #[error("no page geometry in tool output")]
    Unparsable,
    #[error("probe produced no raster output")]
    NoOutput,
    #[error("could not measure raster: {0}")]
    Measure(String),
}

/// One way of finding out how large a document is.
#[async_trait]
pub trait SizeProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, document: &Path) -> Result<PhysicalSize, ProbeError>;
}

/// Tries each probe in order; the first success wins.
pub struct DimensionProber {
    tiers: Vec<Box<dyn SizeProbe>>,
    strict: bool,
}

impl DimensionProber {
    pub fn new(tiers: Vec<Box<dyn SizeProbe>>, strict: bool) -> Self {
        Self { tiers, strict }
    }

    /// Rasterizer geometry report, then image-tool identify (when available), then a
    /// measured 72 DPI render.
    pub fn standard(
        rasterizer: RasterizerStage,
        image_tool: Option<IdentifyProbe>,
        strict: bool,
    ) -> Self {
        let mut tiers: Vec<Box<dyn SizeProbe>> =
            vec![Box::new(GeometryReportProbe::new(rasterizer.clone()))];
        if let Some(identify) = image_tool {
            tiers.push(Box::new(identify));
        }
        tiers.push(Box::new(RasterMeasureProbe::new(rasterizer)));
        Self::new(tiers, strict)
    }

    /// Size of `document`. When every tier fails the result is the flagged placeholder,
    /// or [`RenderError::DimensionProbeExhausted`] in strict mode.
    pub async fn probe_size(&self, document: &Path) -> Result<SizeEstimate, RenderError> {
        for tier in &self.tiers {
            match tier.probe(document).await {
                Ok(size) => {
                    debug!(
                        target = "application::render::probe",
                        tier = tier.name(),
                        size = %size,
                        "Document size measured"
                    );
                    return Ok(SizeEstimate::measured(size, tier.name()));
                }
                Err(err) => {
                    debug!(
                        target = "application::render::probe",
                        tier = tier.name(),
                        error = %err,
                        "Size probe failed; trying next tier"
                    );
                }
            }
        }

        if self.strict {
            return Err(RenderError::DimensionProbeExhausted);
        }

        counter!("texrender_probe_placeholder_total").increment(1);
        warn!(
            target = "application::render::probe",
            document = %document.display(),
            placeholder = %PhysicalSize::PLACEHOLDER,
            "All size probes failed; using placeholder size, output dimensions will be inaccurate"
        );
        Ok(SizeEstimate::placeholder())
    }
}

/// Tier 1: render at 1 DPI and read the page geometry the rasterizer reports.
pub struct GeometryReportProbe {
    rasterizer: RasterizerStage,
}

impl GeometryReportProbe {
    pub fn new(rasterizer: RasterizerStage) -> Self {
        Self { rasterizer }
    }
}

#[async_trait]
impl SizeProbe for GeometryReportProbe {
    fn name(&self) -> &'static str {
        "geometry_report"
    }

    async fn probe(&self, document: &Path) -> Result<PhysicalSize, ProbeError> {
        let base = output_base(document, "_probe");
        let result = self
            .rasterizer
            .invoke(document, &base, 1, RasterFlags::default())
            .await;
        self.rasterizer.remove_outputs(&base).await;

        let output = result?;
        parse_points_geometry(&output.combined()).ok_or(ProbeError::Unparsable)
    }
}

/// Tier 2: ask the image tool to identify the document.
pub struct IdentifyProbe {
    program: PathBuf,
    scratch_dir: PathBuf,
    runner: CommandRunner,
}

impl IdentifyProbe {
    pub fn new(program: PathBuf, scratch_dir: PathBuf, runner: CommandRunner) -> Self {
        Self {
            program,
            scratch_dir,
            runner,
        }
    }
}

#[async_trait]
impl SizeProbe for IdentifyProbe {
    fn name(&self) -> &'static str {
        "identify"
    }

    async fn probe(&self, document: &Path) -> Result<PhysicalSize, ProbeError> {
        let args = [
            "identify".to_string(),
            "-format".to_string(),
            "%w %h\\n".to_string(),
            document.display().to_string(),
        ];
        let output = self
            .runner
            .run(&self.program, &args, &self.scratch_dir)
            .await?;
        parse_identify(&output.stdout).ok_or(ProbeError::Unparsable)
    }
}

/// Tier 3: render cropped at 72 DPI and read the pixel size as points.
pub struct RasterMeasureProbe {
    rasterizer: RasterizerStage,
}

impl RasterMeasureProbe {
    pub fn new(rasterizer: RasterizerStage) -> Self {
        Self { rasterizer }
    }
}

#[async_trait]
impl SizeProbe for RasterMeasureProbe {
    fn name(&self) -> &'static str {
        "raster_measure"
    }

    async fn probe(&self, document: &Path) -> Result<PhysicalSize, ProbeError> {
        let base = output_base(document, "_measure");
        let flags = RasterFlags {
            crop_to_content: true,
            ..Default::default()
        };
        if let Err(err) = self
            .rasterizer
            .invoke(document, &base, MEASURE_DPI, flags)
            .await
        {
            self.rasterizer.remove_outputs(&base).await;
            return Err(err.into());
        }

        let measured = match self.rasterizer.locate_output(&base).await {
            Some(raster) => measure_raster(&raster),
            None => Err(ProbeError::NoOutput),
        };
        self.rasterizer.remove_outputs(&base).await;

        let (width_px, height_px) = measured?;
        PhysicalSize::new(width_px as f64, height_px as f64)
            .ok_or_else(|| ProbeError::Measure("empty raster".to_string()))
    }
}

fn measure_raster(path: &Path) -> Result<(usize, usize), ProbeError> {
    match imagesize::size(path) {
        Ok(size) => Ok((size.width, size.height)),
        Err(ImageError::NotSupported) => Err(ProbeError::Measure("unsupported format".into())),
        Err(ImageError::CorruptedImage) => Err(ProbeError::Measure("corrupted image".into())),
        Err(ImageError::IoError(err)) => Err(ProbeError::Measure(err.to_string())),
    }
}

fn output_base(document: &Path, suffix: &str) -> String {
    let stem = document
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}{suffix}")
}

/// First `<W> x <H> pts` geometry in free-form tool output.
pub fn parse_points_geometry(text: &str) -> Option<PhysicalSize> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.windows(4).find_map(|window| match window {
        [width, "x", height, unit] if unit.starts_with("pts") => {
            PhysicalSize::new(width.parse().ok()?, height.parse().ok()?)
        }
        _ => None,
    })
}

/// `"<W> <H>"` from the first line of identify output.
pub fn parse_identify(text: &str) -> Option<PhysicalSize> {
    let line = text.lines().find(|line| !line.trim().is_empty())?;
    let mut parts = line.split_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    PhysicalSize::new(width, height)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn parses_geometry_report() {
        let output = "Page size:      123.45 x 30.2 pts\nPage rot: 0";
        let size = parse_points_geometry(output).expect("geometry");
        assert_eq!(size.width_pt(), 123.45);
        assert_eq!(size.height_pt(), 30.2);

        assert_eq!(
            parse_points_geometry("page 1: 10 x 20 pts (letter)").map(|s| s.height_pt()),
            Some(20.0)
        );
        assert!(parse_points_geometry("Syntax Error: no pages").is_none());
        assert!(parse_points_geometry("0 x 20 pts").is_none());
    }

    #[test]
    fn parses_identify_output() {
        let size = parse_identify("58 17\n").expect("size");
        assert_eq!((size.width_pt(), size.height_pt()), (58.0, 17.0));
        assert!(parse_identify("garbage").is_none());
        assert!(parse_identify("").is_none());
    }

    #[test]
    fn output_base_uses_document_stem() {
        assert_eq!(
            output_base(Path::new("/tmp/x/abc_step1.pdf"), "_probe"),
            "abc_step1_probe"
        );
    }

    struct StubProbe {
        name: &'static str,
        result: Option<(f64, f64)>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SizeProbe for StubProbe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn probe(&self, _document: &Path) -> Result<PhysicalSize, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .and_then(|(w, h)| PhysicalSize::new(w, h))
                .ok_or(ProbeError::Unparsable)
        }
    }

    fn stub(
        name: &'static str,
        result: Option<(f64, f64)>,
    ) -> (Box<dyn SizeProbe>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = StubProbe {
            name,
            result,
            calls: Arc::clone(&calls),
        };
        (Box::new(probe), calls)
    }

    #[tokio::test]
    async fn falls_through_to_first_successful_tier() {
        let (first, first_calls) = stub("first", None);
        let (second, second_calls) = stub("second", Some((40.0, 12.0)));
        let (third, third_calls) = stub("third", Some((1.0, 1.0)));
        let prober = DimensionProber::new(vec![first, second, third], false);

        let estimate = prober
            .probe_size(Path::new("doc.pdf"))
            .await
            .expect("estimate");

        let expected = PhysicalSize::new(40.0, 12.0).expect("size");
        assert_eq!(estimate, SizeEstimate::measured(expected, "second"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhaustion_yields_flagged_placeholder() {
        let (first, _) = stub("first", None);
        let (second, _) = stub("second", None);
        let prober = DimensionProber::new(vec![first, second], false);

        let estimate = prober
            .probe_size(Path::new("doc.pdf"))
            .await
            .expect("placeholder");
        assert!(estimate.is_placeholder());
        assert_eq!(estimate.size, PhysicalSize::PLACEHOLDER);
    }

    #[tokio::test]
    async fn strict_mode_surfaces_exhaustion() {
        let (only, _) = stub("only", None);
        let prober = DimensionProber::new(vec![only], true);

        let err = prober
            .probe_size(Path::new("doc.pdf"))
            .await
            .expect_err("exhausted");
        assert!(matches!(err, RenderError::DimensionProbeExhausted));
    }
}
