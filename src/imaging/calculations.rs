//! Pure calculation functions for raster geometry and color coefficients.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::ChannelOrder;
use super::params::ScaleQuality;
use crate::geometry::{ImageSize, Rect};
use crate::params::OutputFormat;

/// Angles this close to a multiple of 90° are treated as exact quarter turns.
const QUARTER_TURN_EPSILON: f64 = 1e-9;

/// Normalize an angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let a = degrees % 360.0;
    if a < 0.0 { a + 360.0 } else { a }
}

/// Number of clockwise quarter turns if `degrees` is a multiple of 90.
pub fn quarter_turns(degrees: f64) -> Option<u8> {
    let turns = normalize_degrees(degrees) / 90.0;
    let nearest = turns.round();
    ((turns - nearest).abs() < QUARTER_TURN_EPSILON).then_some((nearest as u32 % 4) as u8)
}

/// Canvas size needed to hold a `size` image rotated by `degrees`.
///
/// Quarter turns are exact. Other angles use the bounding box of the rotated
/// corners, rounded up.
pub fn rotated_canvas(size: ImageSize, degrees: f64) -> (u32, u32) {
    if let Some(turns) = quarter_turns(degrees) {
        return if turns % 2 == 0 {
            (size.width, size.height)
        } else {
            (size.height, size.width)
        };
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (w, h) = (size.width as f64, size.height as f64);
    let cw = w * cos.abs() + h * sin.abs();
    let ch = w * sin.abs() + h * cos.abs();
    (snap_ceil(cw), snap_ceil(ch))
}

/// Ceil that ignores float noise just above an integer.
fn snap_ceil(v: f64) -> u32 {
    let r = v.round();
    if (v - r).abs() < 1e-6 { r as u32 } else { v.ceil() as u32 }
}

/// Direction of a mirror operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    Horizontal,
    Vertical,
}

/// Map a mirror axis angle to the flip at the nearest cardinal angle.
///
/// 0, 180 and 360 flip horizontally; 90 and 270 flip vertically.
pub fn mirror_flip(axis_degrees: f64) -> Flip {
    let k = (normalize_degrees(axis_degrees) / 90.0).round() as u32 % 4;
    if k % 2 == 0 {
        Flip::Horizontal
    } else {
        Flip::Vertical
    }
}

/// Reorder RGB coefficients to the buffer's channel order.
pub fn rgb_ordered(coefficients: [f32; 3], order: ChannelOrder) -> [f32; 3] {
    match order {
        ChannelOrder::Rgb => coefficients,
        ChannelOrder::Bgr => [coefficients[2], coefficients[1], coefficients[0]],
    }
}

/// Decode-time subsample stride for a target `scale`.
///
/// Only reductions subsample. At quality 0 the full stride is taken; above,
/// the stride is divided by `min_subsample` so the final resample still has
/// extra pixels to interpolate from. Never below 1.
pub fn subsample_stride(scale: f64, quality: ScaleQuality, min_subsample: u32) -> u32 {
    if scale.is_nan() || scale <= 0.0 || scale >= 1.0 {
        return 1;
    }
    let full = 1.0 / scale;
    let stride = if quality.value() == 0 {
        full.floor()
    } else {
        (full / min_subsample.max(1) as f64).floor()
    };
    (stride as u32).max(1)
}

/// `cont` is an exponent of two.
pub fn contrast_multiplier(cont: f32) -> f32 {
    2f32.powf(cont)
}

/// `rgbm` components are exponents of two; `rgba` components are offsets.
pub fn color_multipliers(rgbm: Option<[f32; 3]>) -> [f32; 3] {
    match rgbm {
        Some(m) => m.map(|e| 2f32.powf(e)),
        None => [1.0; 3],
    }
}

/// MIME type of the rendered output.
///
/// A forced type wins. Otherwise JPEG sources stay JPEG and everything else
/// becomes PNG.
pub fn output_mime(forced: OutputFormat, source_mime: &str) -> &'static str {
    match forced {
        OutputFormat::Jpeg => "image/jpeg",
        OutputFormat::Png => "image/png",
        OutputFormat::Auto if source_mime == "image/jpeg" => "image/jpeg",
        OutputFormat::Auto => "image/png",
    }
}

/// Inner and outer sampling areas for whole-rotation coverage.
///
/// The inner area is the bounding box of `area` rotated about its center, so
/// the output shows the full rotated window. The outer area is the bounding
/// box of the inner one rotated back: sampling it guarantees no corner of the
/// rotated result falls outside decoded pixels.
pub fn rotation_coverage(area: Rect, degrees: f64) -> (Rect, Rect) {
    let (cx, cy) = area.center();
    let inner = area.rotated_bounds(degrees, cx, cy);
    let outer = inner.rotated_bounds(-degrees, cx, cy);
    (inner, outer)
}

/// Where an offset `(dx, dy)` from the center of a buffer ends up after the
/// buffer is rotated clockwise by `degrees` (image coordinates, y down).
pub fn rotate_offset(dx: f64, dy: f64, degrees: f64) -> (f64, f64) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    (dx * cos - dy * sin, dx * sin + dy * cos)
}
