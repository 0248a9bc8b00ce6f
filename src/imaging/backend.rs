//! Pixel backend traits and shared types.
//!
//! Two traits split the work:
//!
//! - [`ImageBackend`] is stateless and shared by every request: it inspects
//!   files (size, MIME type, resolution) and hands out fresh pipelines.
//! - [`PixelPipeline`] is one mutable raster buffer, owned by a single job and
//!   never shared across threads while in use.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use the recording
//! [`MockBackend`](tests::MockBackend).

use super::params::{ColorOp, ScaleQuality};
use crate::geometry::{ImageSize, PixelRect};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode: {0}")]
    Decode(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("Transform failed: {0}")]
    Transform(String),
    #[error("No image loaded")]
    NotLoaded,
}

/// Result of a metadata-only inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub size: ImageSize,
    pub mime: String,
}

/// Physical resolution in dots per inch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

/// Byte order of the three color channels in the decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// One decoded raster and the operations a job applies to it.
///
/// Operations mutate the buffer in place. Every operation except
/// [`set_quality`](Self::set_quality) fails with [`PipelineError::NotLoaded`]
/// before a successful load.
pub trait PixelPipeline: Send {
    /// Interpolation used by subsequent `scale` and `rotate` calls.
    fn set_quality(&mut self, quality: ScaleQuality);

    /// Whether [`load_region`](Self::load_region) is cheaper than `load` + `crop`.
    fn supports_region(&self) -> bool;

    fn load(&mut self, path: &Path) -> Result<(), PipelineError>;

    /// Decode `region` of the file keeping every `subsample`-th pixel on each
    /// axis. The buffer ends up `ceil(region / subsample)` pixels large.
    fn load_region(
        &mut self,
        path: &Path,
        region: PixelRect,
        subsample: u32,
    ) -> Result<(), PipelineError>;

    fn size(&self) -> Result<ImageSize, PipelineError>;

    /// Restrict the buffer to `region`, which must lie inside it.
    fn crop(&mut self, region: PixelRect) -> Result<(), PipelineError>;

    /// Uniform resample by `factor`.
    fn scale(&mut self, factor: f64) -> Result<(), PipelineError>;

    /// Rotate clockwise about the center onto a canvas that holds every
    /// rotated pixel.
    fn rotate(&mut self, degrees: f64) -> Result<(), PipelineError>;

    /// Reflect across the axis at the nearest cardinal angle: 0 and 180 flip
    /// horizontally, 90 and 270 vertically.
    fn mirror(&mut self, axis_degrees: f64) -> Result<(), PipelineError>;

    /// `out = in * mult + add` on every color channel.
    fn enhance(&mut self, mult: f32, add: f32) -> Result<(), PipelineError>;

    /// Per-channel affine adjustment. Coefficients are given in RGB order.
    fn enhance_color(&mut self, mult: [f32; 3], add: [f32; 3]) -> Result<(), PipelineError>;

    fn color_op(&mut self, op: ColorOp) -> Result<(), PipelineError>;

    /// Channel order of the decoded buffer.
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Serialize the buffer as `mime` into `out`.
    fn encode(&mut self, mime: &str, out: &mut dyn Write) -> Result<(), PipelineError>;
}

/// Factory and metadata reader shared by all jobs.
pub trait ImageBackend: Send + Sync {
    /// Pixel size and MIME type without decoding pixel data.
    fn inspect(&self, path: &Path) -> Result<ImageInfo, PipelineError>;

    /// Physical resolution stored in the file, if any.
    fn read_resolution(&self, path: &Path) -> Option<Resolution>;

    /// A fresh, empty pipeline.
    fn pipeline(&self) -> Box<dyn PixelPipeline>;
}
