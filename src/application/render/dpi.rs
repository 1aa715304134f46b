//! Resolution solver: back-solve the rasterizer DPI from a physical size and a pixel target.
//!
//! `pixels = points * dpi / 72`, so `dpi = pixels * 72 / points` per constrained axis.

use super::types::{POINTS_PER_INCH, PhysicalSize, PixelTarget};

pub const MIN_DPI: u32 = 50;
pub const MAX_DPI: u32 = 2400;

/// Resolution that renders `actual` into `target`.
///
/// With both axes constrained the smaller per-axis resolution wins, so the image fits
/// the box on both axes. The result is clamped to [`MIN_DPI`]..=[`MAX_DPI`] and rounded.
pub fn solve_dpi(actual: PhysicalSize, target: PixelTarget, base_dpi: u32) -> u32 {
    let width_dpi = target
        .width_px
        .map(|px| px * POINTS_PER_INCH / actual.width_pt());
    let height_dpi = target
        .height_px
        .map(|px| px * POINTS_PER_INCH / actual.height_pt());

    let raw = match (width_dpi, height_dpi) {
        (None, None) => return base_dpi,
        (Some(w), None) => w,
        (None, Some(h)) => h,
        (Some(w), Some(h)) => w.min(h),
    };

    clamp_dpi(raw)
}

fn clamp_dpi(raw: f64) -> u32 {
    if raw.is_nan() {
        return MIN_DPI;
    }
    let clamped = raw.clamp(f64::from(MIN_DPI), f64::from(MAX_DPI));
    clamped.round() as u32
}

/// Pixel length of `points` rendered at `dpi`.
pub fn pixels_at(points: f64, dpi: u32) -> f64 {
    points * f64::from(dpi) / POINTS_PER_INCH
}
